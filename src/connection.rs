use crate::error::{DeviceError, Result};
use crate::protocol::{RpcRequest, RpcResponse};
use crate::transport::Transport;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway method returning the identity of the device behind the socket
const INFO_METHOD: &str = "miIO.info";

/// WebSocket connection state
struct ConnectionState {
    /// Pending requests waiting for responses
    pending_requests: HashMap<Uuid, oneshot::Sender<RpcResponse>>,
    /// Channel for sending outgoing messages, `None` once torn down
    ws_tx: Option<mpsc::UnboundedSender<Message>>,
}

#[derive(Debug, Clone, Default)]
struct Identity {
    id: Option<String>,
    model: Option<String>,
}

/// JSON-RPC over WebSocket transport to a local device gateway
///
/// Requests are correlated with responses by a uuid, so any number of calls
/// may be in flight at once.
pub struct WsTransport {
    url: String,
    state: Arc<Mutex<ConnectionState>>,
    identity: Mutex<Identity>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Connect to a gateway WebSocket URL and ask it who the device is
    ///
    /// A failed identity query is not fatal; the device id can still come
    /// from configuration.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_requests: HashMap::new(),
            ws_tx: Some(ws_tx),
        }));

        // Forward outgoing messages to the socket; ends when the sender is dropped
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let state_clone = state.clone();
        let read_handle = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = Self::handle_message(&state_clone, &text) {
                            tracing::error!("Error handling message: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Connection closed, fail all pending requests
            let mut state = state_clone.lock();
            state.pending_requests.clear();
            state.ws_tx = None;
        });

        let transport = Self {
            url,
            state,
            identity: Mutex::new(Identity::default()),
            reader: Mutex::new(Some(read_handle)),
        };

        if let Err(e) = transport.identify().await {
            tracing::warn!("Could not identify device at {}: {}", transport.url, e);
        }

        Ok(transport)
    }

    /// Gateway URL this transport is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Query the gateway for the device id and model
    pub async fn identify(&self) -> Result<()> {
        let result = self.send_request(INFO_METHOD, Vec::new()).await?;
        let info = result
            .first()
            .ok_or_else(|| DeviceError::InvalidResponse("Empty info response".to_string()))?;

        let id = info.get("did").and_then(|did| match did {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let model = info
            .get("model")
            .and_then(|m| m.as_str())
            .map(str::to_string);

        tracing::debug!("Identified device {:?} ({:?})", id, model);
        *self.identity.lock() = Identity { id, model };
        Ok(())
    }

    /// Handle an incoming message
    fn handle_message(state: &Arc<Mutex<ConnectionState>>, text: &str) -> Result<()> {
        tracing::debug!("Received: {}", text);

        let response: RpcResponse = serde_json::from_str(text)?;

        let mut state = state.lock();

        match response.id.and_then(|id| state.pending_requests.remove(&id)) {
            Some(tx) => {
                if response.has_error() {
                    tracing::debug!("Request {:?} failed: {:?}", response.id, response.error);
                }
                let _ = tx.send(response);
            }
            None => {
                tracing::debug!(
                    "Ignoring unsolicited message {:?}",
                    response.method.as_deref().unwrap_or("<none>")
                );
            }
        }

        Ok(())
    }

    /// Send a request and wait for the ordered result array
    pub async fn send_request(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>> {
        let request = RpcRequest::new(method, params);
        let request_id = request.id;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();
            let ws_tx = state.ws_tx.clone().ok_or(DeviceError::ConnectionClosed)?;
            state.pending_requests.insert(request_id, tx);

            let json = serde_json::to_string(&request)?;
            tracing::debug!("Sending: {}", json);

            if ws_tx.send(Message::Text(json)).is_err() {
                state.pending_requests.remove(&request_id);
                return Err(DeviceError::ConnectionClosed);
            }
        }

        let response = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(DeviceError::ConnectionClosed),
            Err(_) => {
                self.state.lock().pending_requests.remove(&request_id);
                return Err(DeviceError::Timeout);
            }
        };

        response.into_result()
    }
}

impl Transport for WsTransport {
    fn call<'a>(&'a self, method: &'a str, params: Vec<Value>) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(self.send_request(method, params))
    }

    fn destroy(&self) {
        tracing::info!("Closing connection to {}", self.url);
        {
            let mut state = self.state.lock();
            state.pending_requests.clear();
            // Dropping the sender ends the writer task, which closes the socket
            state.ws_tx = None;
        }
        // Reader would otherwise wait for the peer's close frame
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    fn id(&self) -> Option<String> {
        self.identity.lock().id.clone()
    }

    fn model(&self) -> Option<String> {
        self.identity.lock().model.clone()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}
