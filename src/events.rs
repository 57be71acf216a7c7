use crate::device::ConnectionState;
use crate::error::{DeviceError, Result};
use crate::property::Property;
use tokio::sync::broadcast;

/// Notification emitted by a device
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A single read or write confirmed a new value
    PropertyUpdated(Property),

    /// A batched read updated these properties
    PropertiesRefreshed(Vec<Property>),

    /// The connection state machine moved to a new state
    ConnectionChanged(ConnectionState),
}

impl DeviceEvent {
    /// Names of the properties carried by this event
    pub fn property_names(&self) -> Vec<&str> {
        match self {
            DeviceEvent::PropertyUpdated(property) => vec![property.name()],
            DeviceEvent::PropertiesRefreshed(properties) => {
                properties.iter().map(Property::name).collect()
            }
            DeviceEvent::ConnectionChanged(_) => Vec::new(),
        }
    }
}

/// Receiver for device events
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    /// Create a new event receiver
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once the device has been dropped.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => DeviceError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                DeviceError::ChannelError(format!("Lagged by {} events", n))
            }
        })
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(DeviceError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(DeviceError::ChannelError(format!("Lagged by {} events", n)))
            }
        }
    }
}
