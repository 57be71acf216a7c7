use crate::config::DeviceConfig;
use crate::error::{DeviceError, Result};
use crate::events::{DeviceEvent, EventReceiver};
use crate::property::{Property, PropertyKey, ValueListItem, ValueRange};
use crate::protocol::{PropertyResult, ACTION, GET_PROPERTIES, SET_PROPERTIES};
use crate::schema::{DeviceSchema, SchemaRegistry};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 100;

/// Connectivity of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport attached
    Unbound,
    /// First transport attached, one-time setup running
    BoundUninitialized,
    /// Setup finished on the current transport
    Ready,
    /// Transport attached again after the device was ready once
    BoundReconnected,
}

impl ConnectionState {
    pub fn is_bound(self) -> bool {
        !matches!(self, ConnectionState::Unbound)
    }
}

/// Outcome of a property write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Device acknowledged the write and the cache was updated
    Applied,
    /// Cached value already matched, nothing was sent
    Unchanged,
    /// The transport rejected the write; logged and absorbed
    Failed,
}

/// Snapshot entry returned by [`Device::get_all_prop_name_values`]
#[derive(Debug, Clone, PartialEq)]
pub struct PropNameValue {
    pub name: &'static str,
    pub value: Value,
}

enum Link {
    Unbound,
    BoundUninitialized(Arc<dyn Transport>),
    Ready(Arc<dyn Transport>),
    BoundReconnected(Arc<dyn Transport>),
}

impl Link {
    fn transport(&self) -> Option<&Arc<dyn Transport>> {
        match self {
            Link::Unbound => None,
            Link::BoundUninitialized(t) | Link::Ready(t) | Link::BoundReconnected(t) => Some(t),
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            Link::Unbound => ConnectionState::Unbound,
            Link::BoundUninitialized(_) => ConnectionState::BoundUninitialized,
            Link::Ready(_) => ConnectionState::Ready,
            Link::BoundReconnected(_) => ConnectionState::BoundReconnected,
        }
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct DeviceState<K> {
    properties: BTreeMap<K, Property>,
    link: Link,
    /// Set once first-time setup has completed on some transport
    setup_complete: bool,
    device_id: Option<String>,
}

struct DeviceInner<S: DeviceSchema> {
    schema: S,
    name: String,
    model: String,
    configured_id: Option<String>,
    polling_interval: Duration,
    capabilities: BTreeMap<String, Value>,
    state: Mutex<DeviceState<S::Prop>>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

/// A MIoT device: property cache, capability table and connection lifecycle
///
/// `Device` is a cheap handle; clones share the same state. The registry
/// lock is never held across a transport call, so a poll, a write and an
/// action can be in flight together. Their completions apply in completion
/// order: a poll issued before a write may land after it and overwrite the
/// optimistic value until the next poll. This window is tolerated.
pub struct Device<S: DeviceSchema> {
    inner: Arc<DeviceInner<S>>,
}

impl<S: DeviceSchema> Clone for Device<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: DeviceSchema> Device<S> {
    /// Build an unbound device from its schema and configuration
    pub fn new(schema: S, config: DeviceConfig) -> Result<Self> {
        if let Err(e) = config.validate() {
            tracing::warn!("Rejecting device configuration: {}", e);
            return Err(e);
        }

        let polling_interval = config.polling_interval();
        let model = match config.model {
            Some(configured) if configured != schema.model() => {
                tracing::warn!(
                    "[{}] Configured model {} differs from schema model {}, using configured",
                    config.name,
                    configured,
                    schema.model()
                );
                configured
            }
            Some(configured) => configured,
            None => schema.model().to_string(),
        };

        let mut registry = SchemaRegistry::new();
        schema.init_device_properties(&mut registry);
        schema.init_device_capabilities(&mut registry);
        let (properties, capabilities) = registry.into_parts();

        if properties.is_empty() {
            tracing::warn!("[{}] Device declares no properties", config.name);
        }
        tracing::debug!(
            "[{}] Registered {} properties and {} capabilities for {}",
            config.name,
            properties.len(),
            capabilities.len(),
            model
        );

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(DeviceInner {
                schema,
                name: config.name,
                model,
                configured_id: config.device_id,
                polling_interval,
                capabilities,
                state: Mutex::new(DeviceState {
                    properties,
                    link: Link::Unbound,
                    setup_complete: false,
                    device_id: None,
                }),
                event_tx,
            }),
        })
    }

    /// Display name from the configuration
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Device model, the configured one when given
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Schema the device was built from
    pub fn schema(&self) -> &S {
        &self.inner.schema
    }

    /// Interval the host is expected to call [`poll_properties`](Self::poll_properties) at
    pub fn polling_interval(&self) -> Duration {
        self.inner.polling_interval
    }

    /// Resolved protocol-level device id, known after first-time setup
    pub fn device_id(&self) -> Option<String> {
        self.inner.state.lock().device_id.clone()
    }

    /// Current state of the connection state machine
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().link.state()
    }

    /// Whether a transport is bound
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_bound()
    }

    /// Subscribe to property and connection events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.inner.event_tx.subscribe())
    }

    // ---- capabilities ----

    /// Whether the schema declared this capability
    pub fn has_capability(&self, name: &str) -> bool {
        self.inner.capabilities.contains_key(name)
    }

    /// Value of a declared capability
    pub fn capability(&self, name: &str) -> Option<&Value> {
        self.inner.capabilities.get(name)
    }

    /// All declared capabilities
    pub fn capabilities(&self) -> &BTreeMap<String, Value> {
        &self.inner.capabilities
    }

    // ---- property getters ----

    /// Whether the property was registered
    pub fn has_property(&self, key: S::Prop) -> bool {
        self.inner.state.lock().properties.contains_key(&key)
    }

    /// Snapshot of one property
    pub fn property(&self, key: S::Prop) -> Option<Property> {
        self.inner.state.lock().properties.get(&key).cloned()
    }

    /// Registered keys in registry order
    pub fn property_keys(&self) -> Vec<S::Prop> {
        self.inner.state.lock().properties.keys().copied().collect()
    }

    /// Cached value of a property, `None` if it is not registered
    pub fn get_property_value(&self, key: S::Prop) -> Option<Value> {
        self.inner
            .state
            .lock()
            .properties
            .get(&key)
            .map(|p| p.value().clone())
    }

    /// Cached value, or `0` for unknown properties and undefined values
    pub fn get_safe_property_value(&self, key: S::Prop) -> Value {
        self.inner
            .state
            .lock()
            .properties
            .get(&key)
            .map(Property::safe_value)
            .unwrap_or_else(|| Value::from(0))
    }

    /// Declared range of a property
    pub fn get_property_value_range(&self, key: S::Prop) -> Option<ValueRange> {
        self.inner
            .state
            .lock()
            .properties
            .get(&key)
            .and_then(Property::value_range)
    }

    /// Declared value list of a property, empty when there is none
    pub fn get_property_value_list(&self, key: S::Prop) -> Vec<ValueListItem> {
        self.inner
            .state
            .lock()
            .properties
            .get(&key)
            .map(|p| p.value_list().to_vec())
            .unwrap_or_default()
    }

    /// Name/value snapshot of every readable property, in registry order
    pub fn get_all_prop_name_values(&self) -> Vec<PropNameValue> {
        self.inner
            .state
            .lock()
            .properties
            .iter()
            .filter(|(_, p)| p.is_readable())
            .map(|(key, p)| PropNameValue {
                name: key.name(),
                value: p.value().clone(),
            })
            .collect()
    }

    // ---- lifecycle ----

    /// Attach a transport
    ///
    /// The first attach runs one-time setup: device id resolution, the
    /// schema's setup hook and an initial full fetch. Later attaches only
    /// restore connectivity. A transport that is already bound is destroyed
    /// and replaced.
    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        let first_time = {
            let mut state = self.inner.state.lock();
            if let Some(old) = state.link.transport() {
                tracing::info!("[{}] Replacing existing connection", self.inner.name);
                old.destroy();
            }
            if state.setup_complete {
                state.link = Link::BoundReconnected(transport.clone());
                false
            } else {
                state.link = Link::BoundUninitialized(transport.clone());
                true
            }
        };

        if first_time {
            tracing::info!("[{}] Connected, running first-time setup", self.inner.name);
            self.emit(DeviceEvent::ConnectionChanged(ConnectionState::BoundUninitialized));
            self.run_setup(transport).await;
        } else {
            tracing::info!("[{}] Reconnected", self.inner.name);
            self.emit(DeviceEvent::ConnectionChanged(ConnectionState::BoundReconnected));
        }
    }

    async fn run_setup(&self, transport: Arc<dyn Transport>) {
        let device_id = self
            .inner
            .configured_id
            .clone()
            .or_else(|| transport.id());
        if device_id.is_none() {
            tracing::warn!(
                "[{}] Device id unknown, requests will not be addressed correctly",
                self.inner.name
            );
        }
        self.inner.state.lock().device_id = device_id;

        if let Err(e) = self.inner.schema.device_specific_setup(self).await {
            tracing::warn!("[{}] Device specific setup failed: {}", self.inner.name, e);
        }

        match self.request_all_properties().await {
            Ok(updated) => tracing::debug!(
                "[{}] Initial fetch updated {} properties",
                self.inner.name,
                updated.len()
            ),
            Err(e) => tracing::debug!("[{}] Initial fetch failed: {}", self.inner.name, e),
        }

        let ready = {
            let mut state = self.inner.state.lock();
            let current = matches!(
                &state.link,
                Link::BoundUninitialized(bound) if same_transport(bound, &transport)
            );
            if current {
                state.link = Link::Ready(transport);
                state.setup_complete = true;
            }
            current
        };

        if ready {
            tracing::info!("[{}] Device ready", self.inner.name);
            self.emit(DeviceEvent::ConnectionChanged(ConnectionState::Ready));
        } else {
            tracing::debug!(
                "[{}] Transport changed during setup, not marking ready",
                self.inner.name
            );
        }
    }

    /// Drop the transport without tearing it down
    pub fn detach(&self) -> Option<Arc<dyn Transport>> {
        let old = std::mem::replace(&mut self.inner.state.lock().link, Link::Unbound);
        let transport = old.transport().cloned();
        if transport.is_some() {
            tracing::info!("[{}] Disconnected", self.inner.name);
            self.emit(DeviceEvent::ConnectionChanged(ConnectionState::Unbound));
        }
        transport
    }

    /// Tear down and drop the transport
    pub fn destroy(&self) {
        if let Some(transport) = self.detach() {
            transport.destroy();
        }
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.inner
            .state
            .lock()
            .link
            .transport()
            .cloned()
            .ok_or(DeviceError::NotConnected)
    }

    fn did(&self) -> String {
        self.inner.state.lock().device_id.clone().unwrap_or_default()
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }

    // ---- protocol operations ----

    /// Poll entry point for the host scheduler
    pub async fn poll_properties(&self) -> Result<Vec<Property>> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        self.request_all_properties().await
    }

    /// Read every readable property in one batch
    ///
    /// Response slot `i` belongs to the `i`-th readable property in registry
    /// order. Slots with a non-zero code, no value or an unconvertible value
    /// are skipped. Returns the properties that were updated.
    pub async fn request_all_properties(&self) -> Result<Vec<Property>> {
        let transport = self.transport()?;
        let did = self.did();

        let (keys, params) = {
            let state = self.inner.state.lock();
            let mut keys = Vec::new();
            let mut params = Vec::new();
            for (key, property) in state.properties.iter().filter(|(_, p)| p.is_readable()) {
                keys.push(*key);
                params.push(property.read_request(&did).to_param()?);
            }
            (keys, params)
        };

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let result = transport.call(GET_PROPERTIES, params).await.map_err(|e| {
            tracing::debug!("[{}] Property request failed: {}", self.inner.name, e);
            e
        })?;

        if result.len() != keys.len() {
            tracing::warn!(
                "[{}] Requested {} properties but got {} results",
                self.inner.name,
                keys.len(),
                result.len()
            );
        }

        let updated = {
            let mut state = self.inner.state.lock();
            let mut updated = Vec::new();
            for (key, slot) in keys.iter().zip(result.iter()) {
                let Some(property) = state.properties.get_mut(key) else {
                    continue;
                };
                let slot = match PropertyResult::from_slot(slot) {
                    Ok(slot) => slot,
                    Err(e) => {
                        tracing::debug!("[{}] Malformed slot for {}: {}", self.inner.name, key.name(), e);
                        continue;
                    }
                };
                let Some(raw) = slot.ok_value() else {
                    tracing::debug!(
                        "[{}] Skipping {}, code {}",
                        self.inner.name,
                        key.name(),
                        slot.code
                    );
                    continue;
                };
                match property.normalize(raw) {
                    Some(value) => {
                        property.set_value(value);
                        updated.push(property.clone());
                    }
                    None => tracing::debug!(
                        "[{}] Skipping {}, cannot convert {}",
                        self.inner.name,
                        key.name(),
                        raw
                    ),
                }
            }
            updated
        };

        if !updated.is_empty() {
            self.emit(DeviceEvent::PropertiesRefreshed(updated.clone()));
        }

        Ok(updated)
    }

    /// Set a property, clamping into its range and skipping redundant writes
    pub async fn set_property_value(
        &self,
        key: S::Prop,
        value: impl Into<Value>,
    ) -> Result<SetOutcome> {
        let requested = value.into();

        let (target, current) = {
            let state = self.inner.state.lock();
            if state.link.transport().is_none() {
                return Err(DeviceError::NotConnected);
            }
            let property = state
                .properties
                .get(&key)
                .ok_or_else(|| DeviceError::UnknownProperty(key.name().to_string()))?;
            if !property.is_writable() {
                return Err(DeviceError::NotWritable(key.name().to_string()));
            }
            let clamped = property.clamp_to_range(requested.clone());
            let target = property
                .normalize(&clamped)
                .ok_or_else(|| DeviceError::InvalidValue {
                    property: key.name().to_string(),
                    value: requested.clone(),
                })?;
            (target, property.value().clone())
        };

        if target != requested {
            tracing::debug!(
                "[{}] Adjusted {} from {} to {}",
                self.inner.name,
                key.name(),
                requested,
                target
            );
        }

        if target == current {
            tracing::debug!(
                "[{}] {} already {}, skipping write",
                self.inner.name,
                key.name(),
                current
            );
            return Ok(SetOutcome::Unchanged);
        }

        self.set_property(key, target).await
    }

    /// Write a single property
    ///
    /// The value is converted to the property's format but not clamped. On
    /// acknowledgement the cache is updated and `PropertyUpdated` is
    /// emitted. A transport failure is logged and reported as
    /// [`SetOutcome::Failed`], leaving the cache untouched.
    pub async fn set_property(&self, key: S::Prop, value: Value) -> Result<SetOutcome> {
        let transport = self.transport()?;
        let did = self.did();

        let (value, param) = {
            let state = self.inner.state.lock();
            let property = state
                .properties
                .get(&key)
                .ok_or_else(|| DeviceError::UnknownProperty(key.name().to_string()))?;
            if !property.is_writable() {
                return Err(DeviceError::NotWritable(key.name().to_string()));
            }
            let normalized = property
                .normalize(&value)
                .ok_or_else(|| DeviceError::InvalidValue {
                    property: key.name().to_string(),
                    value: value.clone(),
                })?;
            let param = property.write_request(&did, normalized.clone()).to_param()?;
            (normalized, param)
        };

        tracing::debug!("[{}] Setting {} to {}", self.inner.name, key.name(), value);

        let acknowledged = match transport.call(SET_PROPERTIES, vec![param]).await {
            Ok(result) => match result.first().map(PropertyResult::from_slot) {
                Some(Ok(slot)) if slot.is_ok() => true,
                Some(Ok(slot)) => {
                    tracing::debug!(
                        "[{}] Device refused {}, code {}",
                        self.inner.name,
                        key.name(),
                        slot.code
                    );
                    false
                }
                Some(Err(e)) => {
                    tracing::debug!("[{}] Malformed write result: {}", self.inner.name, e);
                    false
                }
                None => {
                    tracing::debug!("[{}] Empty write result for {}", self.inner.name, key.name());
                    false
                }
            },
            Err(e) => {
                tracing::debug!("[{}] Failed to set {}: {}", self.inner.name, key.name(), e);
                false
            }
        };

        if !acknowledged {
            return Ok(SetOutcome::Failed);
        }

        let updated = {
            let mut state = self.inner.state.lock();
            state.properties.get_mut(&key).map(|property| {
                property.set_value(value);
                property.clone()
            })
        };

        if let Some(property) = updated {
            self.emit(DeviceEvent::PropertyUpdated(property));
        }

        Ok(SetOutcome::Applied)
    }

    /// Invoke a device action addressed like a property
    ///
    /// Fire-and-forget: the outcome is logged, nothing is cached or emitted.
    pub async fn send_command(&self, key: S::Prop, value: impl Into<Value>) -> Result<()> {
        let transport = self.transport()?;
        let did = self.did();
        let value = value.into();

        let param = {
            let state = self.inner.state.lock();
            let property = state
                .properties
                .get(&key)
                .ok_or_else(|| DeviceError::UnknownProperty(key.name().to_string()))?;
            property.write_request(&did, value.clone()).to_param()?
        };

        match transport.call(ACTION, vec![param]).await {
            Ok(result) => tracing::debug!(
                "[{}] Command {} {} sent: {:?}",
                self.inner.name,
                key.name(),
                value,
                result
            ),
            Err(e) => tracing::debug!(
                "[{}] Command {} {} failed: {}",
                self.inner.name,
                key.name(),
                value,
                e
            ),
        }

        Ok(())
    }

    /// Read a single property and emit `PropertyUpdated` on success
    pub async fn request_property(&self, key: S::Prop) -> Result<Property> {
        let param_for = |did: &str| -> Result<Value> {
            let state = self.inner.state.lock();
            let property = state
                .properties
                .get(&key)
                .ok_or_else(|| DeviceError::UnknownProperty(key.name().to_string()))?;
            if !property.is_readable() {
                return Err(DeviceError::NotReadable(key.name().to_string()));
            }
            property.read_request(did).to_param()
        };

        // Existence and access are checked before connectivity
        param_for("")?;
        let transport = self.transport()?;
        let param = param_for(&self.did())?;

        let result = transport.call(GET_PROPERTIES, vec![param]).await.map_err(|e| {
            tracing::debug!("[{}] Failed to read {}: {}", self.inner.name, key.name(), e);
            e
        })?;

        let slot = result
            .first()
            .ok_or_else(|| DeviceError::InvalidResponse(format!("no result for {}", key.name())))
            .and_then(PropertyResult::from_slot)?;

        let Some(raw) = slot.ok_value() else {
            return Err(DeviceError::Rpc {
                code: slot.code,
                message: format!("reading {} failed", key.name()),
            });
        };

        let updated = {
            let mut state = self.inner.state.lock();
            let property = state
                .properties
                .get_mut(&key)
                .ok_or_else(|| DeviceError::UnknownProperty(key.name().to_string()))?;
            let value = property.normalize(raw).ok_or_else(|| {
                DeviceError::InvalidResponse(format!("cannot convert {} for {}", raw, key.name()))
            })?;
            property.set_value(value);
            property.clone()
        };

        self.emit(DeviceEvent::PropertyUpdated(updated.clone()));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Access, PropertyConfig, PropertyFormat};
    use crate::transport::mock::MockTransport;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    crate::property_keys! {
        enum TestProp {
            Power => "power",
            FanLevel => "fan_level",
            Temperature => "temperature",
            Broken => "broken",
            Buzzer => "buzzer",
        }
    }

    #[derive(Default)]
    struct TestSchema {
        setups: AtomicUsize,
    }

    impl DeviceSchema for TestSchema {
        type Prop = TestProp;

        fn model(&self) -> &str {
            "test.fan.v1"
        }

        fn init_device_properties(&self, registry: &mut SchemaRegistry<TestProp>) {
            registry.add_property(
                TestProp::Power,
                PropertyConfig::new(2, 1, PropertyFormat::Bool).access(Access::READ_WRITE),
            );
            registry.add_property(
                TestProp::FanLevel,
                PropertyConfig::new(2, 2, PropertyFormat::Int)
                    .access(Access::READ_WRITE)
                    .range(ValueRange::new(1.0, 3.0).with_step(1.0)),
            );
            registry.add_property(
                TestProp::Temperature,
                PropertyConfig::new(3, 7, PropertyFormat::Float).access(Access::READ),
            );
            let mut broken = PropertyConfig::new(9, 9, PropertyFormat::Bool);
            broken.siid = None;
            registry.add_property(TestProp::Broken, broken);
            registry.add_property(
                TestProp::Buzzer,
                PropertyConfig::new(5, 1, PropertyFormat::Bool).access(Access::WRITE),
            );
        }

        fn init_device_capabilities(&self, registry: &mut SchemaRegistry<TestProp>) {
            registry.add_capability("fan_levels", 3);
        }

        fn device_specific_setup<'a>(
            &'a self,
            _device: &'a Device<Self>,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.setups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn device() -> Device<TestSchema> {
        Device::new(TestSchema::default(), DeviceConfig::new("Test fan")).unwrap()
    }

    fn fake_device() -> Arc<MockTransport> {
        Arc::new(
            MockTransport::new("did-1")
                .with_value(2, 1, json!(false))
                .with_value(2, 2, json!(2))
                .with_value(3, 7, json!(21.5)),
        )
    }

    async fn connected() -> (Device<TestSchema>, Arc<MockTransport>) {
        let device = device();
        let mock = fake_device();
        device.attach(mock.clone()).await;
        mock.clear_calls();
        (device, mock)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn malformed_property_is_not_registered() {
        let device = device();
        assert!(!device.has_property(TestProp::Broken));
        assert!(device.has_property(TestProp::Power));
        assert_eq!(
            device.property_keys(),
            vec![
                TestProp::Power,
                TestProp::FanLevel,
                TestProp::Temperature,
                TestProp::Buzzer
            ]
        );
    }

    #[test]
    fn capabilities_are_declared_at_construction() {
        let device = device();
        assert!(device.has_capability("fan_levels"));
        assert_eq!(device.capability("fan_levels"), Some(&json!(3)));
        assert!(!device.has_capability("swing"));
    }

    #[test]
    fn configured_model_wins() {
        let overridden = Device::new(
            TestSchema::default(),
            DeviceConfig::new("Fan").with_model("test.fan.v2"),
        )
        .unwrap();
        assert_eq!(overridden.model(), "test.fan.v2");
        assert_eq!(device().model(), "test.fan.v1");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = Device::new(TestSchema::default(), DeviceConfig::new(""));
        assert!(matches!(result, Err(DeviceError::Config(_))));
    }

    #[test]
    fn getters_degrade_gracefully() {
        let device = device();
        assert!(!device.is_connected());
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(false)));
        assert_eq!(device.get_safe_property_value(TestProp::Broken), json!(0));
        assert_eq!(
            device.get_property_value_range(TestProp::FanLevel),
            Some(ValueRange::new(1.0, 3.0).with_step(1.0))
        );
        assert!(device.get_property_value_list(TestProp::Power).is_empty());
    }

    #[tokio::test]
    async fn poll_without_transport_is_rejected() {
        let device = device();
        assert!(matches!(
            device.poll_properties().await,
            Err(DeviceError::NotConnected)
        ));
        assert!(matches!(
            device.request_all_properties().await,
            Err(DeviceError::NotConnected)
        ));
        assert_eq!(device.connection_state(), ConnectionState::Unbound);
    }

    #[tokio::test]
    async fn first_attach_runs_setup_and_fetches() {
        let device = device();
        let mock = fake_device();
        let mut rx = device.subscribe();

        device.attach(mock.clone()).await;

        assert_eq!(device.connection_state(), ConnectionState::Ready);
        assert_eq!(device.device_id().as_deref(), Some("did-1"));
        assert_eq!(device.schema().setups.load(Ordering::SeqCst), 1);
        assert_eq!(mock.calls_to(GET_PROPERTIES), 1);
        assert_eq!(device.get_property_value(TestProp::Temperature), Some(json!(21.5)));

        let events = drain(&mut rx);
        assert!(matches!(
            events.first(),
            Some(DeviceEvent::ConnectionChanged(ConnectionState::BoundUninitialized))
        ));
        assert!(matches!(
            events.last(),
            Some(DeviceEvent::ConnectionChanged(ConnectionState::Ready))
        ));
    }

    #[tokio::test]
    async fn reconnect_skips_setup() {
        let (device, first) = connected().await;

        device.detach();
        assert_eq!(device.connection_state(), ConnectionState::Unbound);
        assert!(!first.is_destroyed());

        let second = fake_device();
        device.attach(second.clone()).await;

        assert_eq!(device.connection_state(), ConnectionState::BoundReconnected);
        assert!(device.is_connected());
        assert_eq!(device.schema().setups.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls_to(GET_PROPERTIES), 0);
    }

    #[tokio::test]
    async fn attach_replaces_and_destroys_old_transport() {
        let (device, first) = connected().await;
        let second = fake_device();

        device.attach(second.clone()).await;

        assert!(first.is_destroyed());
        assert!(!second.is_destroyed());
        assert_eq!(device.connection_state(), ConnectionState::BoundReconnected);
    }

    #[tokio::test]
    async fn destroy_tears_down_transport() {
        let (device, mock) = connected().await;
        device.destroy();

        assert!(mock.is_destroyed());
        assert!(!device.is_connected());
        assert!(matches!(
            device.set_property(TestProp::Power, json!(true)).await,
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn configured_device_id_is_preferred() {
        let device = Device::new(
            TestSchema::default(),
            DeviceConfig::new("Fan").with_device_id("configured"),
        )
        .unwrap();
        let mock = fake_device();
        device.attach(mock.clone()).await;

        assert_eq!(device.device_id().as_deref(), Some("configured"));
        let (_, params) = &mock.calls()[0];
        assert_eq!(params[0]["did"], json!("configured"));
    }

    #[tokio::test]
    async fn missing_device_id_is_not_fatal() {
        let device = device();
        device.attach(Arc::new(MockTransport::anonymous())).await;

        assert_eq!(device.device_id(), None);
        assert_eq!(device.connection_state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn initial_fetch_failure_is_swallowed() {
        let device = device();
        let mock = fake_device();
        mock.fail_next();

        device.attach(mock.clone()).await;

        assert_eq!(device.connection_state(), ConnectionState::Ready);
        assert_eq!(device.get_property_value(TestProp::Temperature), Some(json!(0.0)));
    }

    #[tokio::test]
    async fn batch_read_maps_slots_by_position() {
        let (device, mock) = connected().await;
        mock.push_response(Ok(vec![
            json!({"code": 0, "value": true}),
            json!({"code": -4001}),
            json!({"code": 0, "value": 19}),
        ]));

        let updated = device.request_all_properties().await.unwrap();

        let (method, params) = &mock.calls()[0];
        assert_eq!(method, GET_PROPERTIES);
        assert_eq!(
            params,
            &vec![
                json!({"did": "did-1", "siid": 2, "piid": 1}),
                json!({"did": "did-1", "siid": 2, "piid": 2}),
                json!({"did": "did-1", "siid": 3, "piid": 7}),
            ]
        );

        let names: Vec<&str> = updated.iter().map(Property::name).collect();
        assert_eq!(names, vec!["power", "temperature"]);
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(true)));
        // Slot 1 failed, the cached level from setup stays
        assert_eq!(device.get_property_value(TestProp::FanLevel), Some(json!(2)));
        assert_eq!(device.get_property_value(TestProp::Temperature), Some(json!(19.0)));
    }

    #[tokio::test]
    async fn short_and_malformed_batches_skip_slots() {
        let (device, mock) = connected().await;
        mock.push_response(Ok(vec![json!("garbage"), json!({"code": 0, "value": [1]})]));

        let updated = device.request_all_properties().await.unwrap();

        assert!(updated.is_empty());
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(false)));
        assert_eq!(device.get_property_value(TestProp::FanLevel), Some(json!(2)));
    }

    #[tokio::test]
    async fn batch_transport_failure_rejects() {
        let (device, mock) = connected().await;
        mock.fail_next();
        assert!(matches!(
            device.poll_properties().await,
            Err(DeviceError::Timeout)
        ));
    }

    #[tokio::test]
    async fn set_power_writes_and_notifies_once() {
        let (device, mock) = connected().await;
        let mut rx = device.subscribe();

        let outcome = device.set_property_value(TestProp::Power, true).await.unwrap();

        assert_eq!(outcome, SetOutcome::Applied);
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SET_PROPERTIES);
        assert_eq!(
            calls[0].1,
            vec![json!({"did": "did-1", "siid": 2, "piid": 1, "value": true})]
        );
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(true)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DeviceEvent::PropertyUpdated(property) => {
                assert_eq!(property.name(), "power");
                assert_eq!(property.value(), &json!(true));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn repeated_set_writes_once() {
        let (device, mock) = connected().await;

        assert_eq!(
            device.set_property_value(TestProp::Power, true).await.unwrap(),
            SetOutcome::Applied
        );
        assert_eq!(
            device.set_property_value(TestProp::Power, true).await.unwrap(),
            SetOutcome::Unchanged
        );
        assert_eq!(mock.calls_to(SET_PROPERTIES), 1);
    }

    #[tokio::test]
    async fn out_of_range_values_are_clamped() {
        let (device, mock) = connected().await;

        device.set_property_value(TestProp::FanLevel, 5).await.unwrap();
        assert_eq!(device.get_property_value(TestProp::FanLevel), Some(json!(3)));
        assert_eq!(mock.device_value(2, 2), Some(json!(3)));

        device.set_property_value(TestProp::FanLevel, -7).await.unwrap();
        assert_eq!(device.get_property_value(TestProp::FanLevel), Some(json!(1)));
        assert_eq!(mock.device_value(2, 2), Some(json!(1)));
    }

    #[tokio::test]
    async fn clamped_value_equal_to_cache_is_skipped() {
        let (device, mock) = connected().await;
        device.set_property_value(TestProp::FanLevel, 3).await.unwrap();
        mock.clear_calls();

        let outcome = device.set_property_value(TestProp::FanLevel, 10).await.unwrap();

        assert_eq!(outcome, SetOutcome::Unchanged);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_and_stays_silent() {
        let (device, mock) = connected().await;
        let mut rx = device.subscribe();
        mock.fail_next();

        let outcome = device.set_property_value(TestProp::Power, true).await.unwrap();

        assert_eq!(outcome, SetOutcome::Failed);
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(false)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn refused_write_is_absorbed() {
        let (device, mock) = connected().await;
        mock.push_response(Ok(vec![json!({"code": -4004})]));

        let outcome = device.set_property_value(TestProp::Power, true).await.unwrap();

        assert_eq!(outcome, SetOutcome::Failed);
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(false)));
    }

    #[tokio::test]
    async fn write_guards() {
        let (device, _mock) = connected().await;

        assert!(matches!(
            device.set_property_value(TestProp::Temperature, 30.0).await,
            Err(DeviceError::NotWritable(_))
        ));
        assert!(matches!(
            device.set_property_value(TestProp::Broken, true).await,
            Err(DeviceError::UnknownProperty(_))
        ));
        assert!(matches!(
            device.set_property_value(TestProp::FanLevel, "fast").await,
            Err(DeviceError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn read_only_write_fails_even_when_value_matches_cache() {
        let (device, mock) = connected().await;
        assert_eq!(
            device.get_property_value(TestProp::Temperature),
            Some(json!(21.5))
        );

        assert!(matches!(
            device.set_property_value(TestProp::Temperature, 21.5).await,
            Err(DeviceError::NotWritable(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn unbound_write_is_rejected_before_cache_comparison() {
        let device = device();

        assert!(matches!(
            device.set_property_value(TestProp::Power, false).await,
            Err(DeviceError::NotConnected)
        ));
        assert!(matches!(
            device.set_property_value(TestProp::Temperature, 0.0).await,
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn direct_set_caches_value_in_declared_format() {
        let (device, mock) = connected().await;

        let outcome = device
            .set_property(TestProp::FanLevel, json!("3"))
            .await
            .unwrap();

        assert_eq!(outcome, SetOutcome::Applied);
        assert_eq!(device.get_property_value(TestProp::FanLevel), Some(json!(3)));
        assert_eq!(mock.device_value(2, 2), Some(json!(3)));
        assert_eq!(
            device.set_property_value(TestProp::FanLevel, 3).await.unwrap(),
            SetOutcome::Unchanged
        );

        assert!(matches!(
            device.set_property(TestProp::FanLevel, json!("fast")).await,
            Err(DeviceError::InvalidValue { .. })
        ));
        assert_eq!(mock.calls_to(SET_PROPERTIES), 1);
    }

    #[tokio::test]
    async fn write_only_property_is_excluded_from_reads() {
        let (device, mock) = connected().await;

        device.request_all_properties().await.unwrap();

        let (_, params) = &mock.calls()[0];
        assert!(params.iter().all(|p| p["siid"] != json!(5)));
        let names: Vec<&str> = device
            .get_all_prop_name_values()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["power", "fan_level", "temperature"]);
    }

    #[tokio::test]
    async fn send_command_does_not_touch_cache() {
        let (device, mock) = connected().await;
        let mut rx = device.subscribe();

        device.send_command(TestProp::Buzzer, true).await.unwrap();
        mock.fail_next();
        device.send_command(TestProp::Buzzer, false).await.unwrap();

        assert_eq!(mock.calls_to(ACTION), 2);
        assert_eq!(device.get_property_value(TestProp::Buzzer), Some(json!(false)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn send_command_guards() {
        let device = device();
        assert!(matches!(
            device.send_command(TestProp::Buzzer, true).await,
            Err(DeviceError::NotConnected)
        ));
        let (device, _mock) = connected().await;
        assert!(matches!(
            device.send_command(TestProp::Broken, true).await,
            Err(DeviceError::UnknownProperty(_))
        ));
    }

    #[tokio::test]
    async fn request_property_reads_and_notifies() {
        let (device, mock) = connected().await;
        let mut rx = device.subscribe();
        mock.push_response(Ok(vec![json!({"code": 0, "value": 24.0})]));

        let property = device.request_property(TestProp::Temperature).await.unwrap();

        assert_eq!(property.value(), &json!(24.0));
        assert_eq!(device.get_property_value(TestProp::Temperature), Some(json!(24.0)));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn request_property_guards() {
        let device = device();
        assert!(matches!(
            device.request_property(TestProp::Buzzer).await,
            Err(DeviceError::NotReadable(_))
        ));
        assert!(matches!(
            device.request_property(TestProp::Broken).await,
            Err(DeviceError::UnknownProperty(_))
        ));
        assert!(matches!(
            device.request_property(TestProp::Power).await,
            Err(DeviceError::NotConnected)
        ));

        let (device, mock) = connected().await;
        mock.push_response(Ok(vec![json!({"code": -4003})]));
        assert!(matches!(
            device.request_property(TestProp::Power).await,
            Err(DeviceError::Rpc { code: -4003, .. })
        ));
    }

    #[tokio::test]
    async fn poll_emits_refresh_event() {
        let (device, mock) = connected().await;
        let mut rx = device.subscribe();
        mock.push_response(Ok(vec![
            json!({"code": 0, "value": 1}),
            json!({"code": 0, "value": 3}),
            json!({"code": 0, "value": 20}),
        ]));

        device.poll_properties().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].property_names(),
            vec!["power", "fan_level", "temperature"]
        );
        assert_eq!(device.get_property_value(TestProp::Power), Some(json!(true)));
    }
}
