use crate::device::{Device, SetOutcome};
use crate::error::{DeviceError, Result};
use crate::events::DeviceEvent;
use crate::property::{Property, PropertyKey};
use crate::schema::DeviceSchema;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Push sink of the home-automation host
///
/// Called from the poll loop whenever a control's value should be re-rendered.
pub trait Presenter: Send + Sync {
    fn update_control(&self, control: &str, value: &Value);
}

/// How a property is shown to the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// On/off, presented as a bool
    Switch,
    /// Read-only reading
    Sensor,
    /// Numeric setpoint
    Level,
}

impl ControlKind {
    /// Value shown while the device cannot be reached
    fn fallback(self) -> Value {
        match self {
            ControlKind::Switch => Value::Bool(false),
            ControlKind::Sensor | ControlKind::Level => Value::from(0),
        }
    }

    fn present(self, value: Value) -> Value {
        match self {
            ControlKind::Switch => Value::Bool(match &value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => false,
            }),
            _ if value.is_null() => Value::from(0),
            _ => value,
        }
    }
}

/// One externally visible control backed by a device property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control<K> {
    pub name: &'static str,
    pub property: K,
    pub kind: ControlKind,
}

impl<K> Control<K> {
    pub fn switch(name: &'static str, property: K) -> Self {
        Self {
            name,
            property,
            kind: ControlKind::Switch,
        }
    }

    pub fn sensor(name: &'static str, property: K) -> Self {
        Self {
            name,
            property,
            kind: ControlKind::Sensor,
        }
    }

    pub fn level(name: &'static str, property: K) -> Self {
        Self {
            name,
            property,
            kind: ControlKind::Level,
        }
    }
}

/// Bridges one device to the host platform's controls
///
/// Getters and setters called by the host fail with
/// [`DeviceError::ServiceUnavailable`] while the device is disconnected.
pub struct AccessoryAdapter<S: DeviceSchema> {
    device: Device<S>,
    controls: Arc<Vec<Control<S::Prop>>>,
    presenter: Arc<dyn Presenter>,
}

impl<S: DeviceSchema> Clone for AccessoryAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            controls: self.controls.clone(),
            presenter: self.presenter.clone(),
        }
    }
}

impl<S: DeviceSchema> AccessoryAdapter<S> {
    /// Create an adapter; controls for unregistered properties are dropped
    pub fn new(
        device: Device<S>,
        controls: Vec<Control<S::Prop>>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let controls = controls
            .into_iter()
            .filter(|control| {
                let known = device.has_property(control.property);
                if !known {
                    tracing::warn!(
                        "[{}] Dropping control {}, property {} is not registered",
                        device.name(),
                        control.name,
                        control.property.name()
                    );
                }
                known
            })
            .collect();

        Self {
            device,
            controls: Arc::new(controls),
            presenter,
        }
    }

    pub fn device(&self) -> &Device<S> {
        &self.device
    }

    pub fn controls(&self) -> &[Control<S::Prop>] {
        &self.controls
    }

    fn control(&self, name: &str) -> Result<Control<S::Prop>> {
        self.controls
            .iter()
            .find(|control| control.name == name)
            .copied()
            .ok_or_else(|| DeviceError::UnknownProperty(name.to_string()))
    }

    fn unavailable(&self) -> DeviceError {
        DeviceError::ServiceUnavailable(format!("{} is not connected", self.device.name()))
    }

    /// Current value of a control, for host getters
    pub fn get(&self, name: &str) -> Result<Value> {
        let control = self.control(name)?;
        if !self.device.is_connected() {
            return Err(self.unavailable());
        }
        Ok(control
            .kind
            .present(self.device.get_safe_property_value(control.property)))
    }

    /// Apply a value from a host setter
    pub async fn set(&self, name: &str, value: Value) -> Result<SetOutcome> {
        let control = self.control(name)?;
        if control.kind == ControlKind::Sensor {
            return Err(DeviceError::NotWritable(name.to_string()));
        }
        if !self.device.is_connected() {
            return Err(self.unavailable());
        }
        self.device.set_property_value(control.property, value).await
    }

    /// Push every control's cached value to the host
    pub fn update_device_status(&self) {
        let connected = self.device.is_connected();
        for control in self.controls.iter() {
            let value = if connected {
                control
                    .kind
                    .present(self.device.get_safe_property_value(control.property))
            } else {
                control.kind.fallback()
            };
            self.presenter.update_control(control.name, &value);
        }
    }

    /// Push the controls backed by `property`
    pub fn push_property(&self, property: &Property) {
        for control in self
            .controls
            .iter()
            .filter(|control| control.property.name() == property.name())
        {
            let value = control.kind.present(property.safe_value());
            self.presenter.update_control(control.name, &value);
        }
    }

    /// Start polling the device at its configured interval
    ///
    /// Each tick polls the device and pushes every control; single-property
    /// updates and connection changes are pushed as they happen.
    pub fn start(&self) -> AccessoryTask {
        self.start_with_interval(self.device.polling_interval())
    }

    pub fn start_with_interval(&self, interval: Duration) -> AccessoryTask {
        let (stop_tx, _) = broadcast::channel(1);
        let mut stop_rx = stop_tx.subscribe();
        let mut events = self.device.subscribe();
        let adapter = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("[{}] Polling stopped", adapter.device.name());
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = adapter.device.poll_properties().await {
                            tracing::debug!("[{}] Poll failed: {}", adapter.device.name(), e);
                        }
                        adapter.update_device_status();
                    }
                    event = events.recv() => match event {
                        Ok(DeviceEvent::PropertyUpdated(property)) => adapter.push_property(&property),
                        Ok(DeviceEvent::ConnectionChanged(_)) => adapter.update_device_status(),
                        Ok(DeviceEvent::PropertiesRefreshed(_)) => {}
                        Err(DeviceError::ChannelError(e)) => {
                            tracing::debug!("[{}] {}", adapter.device.name(), e);
                            adapter.update_device_status();
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        AccessoryTask {
            stop_tx,
            handle: Some(handle),
        }
    }
}

/// Handle to a running poll loop
pub struct AccessoryTask {
    stop_tx: broadcast::Sender<()>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AccessoryTask {
    /// Stop the poll loop, waiting briefly for it to finish
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }
}

impl Drop for AccessoryTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
