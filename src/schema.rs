use crate::device::Device;
use crate::error::Result;
use crate::property::{Property, PropertyConfig, PropertyKey};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;

/// Property and capability declarations collected while building a device
pub struct SchemaRegistry<K: PropertyKey> {
    properties: BTreeMap<K, Property>,
    capabilities: BTreeMap<String, Value>,
}

impl<K: PropertyKey> SchemaRegistry<K> {
    pub(crate) fn new() -> Self {
        Self {
            properties: BTreeMap::new(),
            capabilities: BTreeMap::new(),
        }
    }

    /// Register a property
    ///
    /// Malformed declarations are logged and skipped; returns whether the
    /// property was added.
    pub fn add_property(&mut self, key: K, config: PropertyConfig) -> bool {
        match Property::from_config(key.name(), config) {
            Ok(property) => {
                if self.properties.insert(key, property).is_some() {
                    tracing::warn!("Property {} declared twice, keeping the last one", key.name());
                }
                true
            }
            Err(e) => {
                tracing::warn!("Skipping property {:?}: {}", key, e);
                false
            }
        }
    }

    /// Register a capability flag or metadata entry
    pub fn add_capability(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.capabilities.insert(name.into(), value.into());
    }

    pub fn has_property(&self, key: K) -> bool {
        self.properties.contains_key(&key)
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<K, Property>, BTreeMap<String, Value>) {
        (self.properties, self.capabilities)
    }
}

/// Static description of one device model
///
/// Implementors declare their properties and capabilities once, before any
/// transport exists, and may run extra work the first time a transport is
/// attached.
pub trait DeviceSchema: Send + Sync + Sized + 'static {
    /// Property names of this model
    type Prop: PropertyKey;

    /// Vendor model string, e.g. `zhimi.fan.za4`
    fn model(&self) -> &str;

    fn init_device_properties(&self, registry: &mut SchemaRegistry<Self::Prop>);

    fn init_device_capabilities(&self, registry: &mut SchemaRegistry<Self::Prop>);

    /// Runs once during first-time setup, after the device id is resolved and
    /// before the initial property fetch. Errors are logged, not fatal.
    fn device_specific_setup<'a>(&'a self, _device: &'a Device<Self>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
