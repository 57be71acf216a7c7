use crate::error::Result;
use futures_util::future::BoxFuture;
use serde_json::Value;

/// Live connection used to perform remote calls against one physical device
///
/// Implementations must tolerate several calls in flight at once: a poll, a
/// write and an action may all be outstanding against the same handle.
pub trait Transport: Send + Sync {
    /// Perform `method` with positional `params` and return the ordered result array
    fn call<'a>(&'a self, method: &'a str, params: Vec<Value>) -> BoxFuture<'a, Result<Vec<Value>>>;

    /// Tear the connection down; later calls fail with `ConnectionClosed`
    fn destroy(&self);

    /// Device id reported by the connection, if known
    fn id(&self) -> Option<String>;

    /// Model string reported by the connection, if known
    fn model(&self) -> Option<String>;
}
