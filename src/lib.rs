//! Property and polling core for exposing MIoT smart-home devices as
//! home-automation accessories
//!
//! The crate sits between a device RPC transport and the presentation layer
//! of a home-automation host. It provides:
//!
//! - Typed, addressable device properties with range/enum metadata
//! - A device state machine that survives disconnects and reconnects
//! - Batched property polling with positional response mapping
//! - Idempotent, range-clamped property writes with optimistic caching
//! - Typed change notifications
//! - An accessory adapter that drives polling and pushes control values
//!
//! # Quick Start
//!
//! ```no_run
//! use miot_bridge::models::{FanProp, FanSchema};
//! use miot_bridge::{Device, DeviceConfig, WsTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("Bedroom fan").with_device_id("123456789");
//!     let device = Device::new(FanSchema, config)?;
//!
//!     let transport = WsTransport::connect("ws://192.168.1.20:8765").await?;
//!     device.attach(Arc::new(transport)).await;
//!
//!     device.set_property_value(FanProp::Power, true).await?;
//!     device.set_property_value(FanProp::FanLevel, 3).await?;
//!
//!     for entry in device.get_all_prop_name_values() {
//!         println!("{} = {}", entry.name, entry.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Property**: descriptor and cached value of one device property
//! - **Schema**: per-model property and capability declarations
//! - **Device**: registry, connection lifecycle and protocol operations
//! - **Transport**: the RPC seam, with a WebSocket gateway implementation
//! - **Accessory**: host-facing controls and the poll loop

pub mod accessory;
mod config;
mod connection;
mod device;
mod error;
mod events;
pub mod models;
mod property;
mod protocol;
mod schema;
mod transport;

// Public exports
pub use accessory::{AccessoryAdapter, AccessoryTask, Control, ControlKind, Presenter};
pub use config::DeviceConfig;
pub use connection::WsTransport;
pub use device::{ConnectionState, Device, PropNameValue, SetOutcome};
pub use error::{DeviceError, Result};
pub use events::{DeviceEvent, EventReceiver};
pub use property::{
    Access, AccessFlag, Property, PropertyConfig, PropertyFormat, PropertyKey, ValueListItem,
    ValueRange,
};
pub use protocol::{PropertyRequest, PropertyResult, ACTION, GET_PROPERTIES, SET_PROPERTIES};
pub use schema::{DeviceSchema, SchemaRegistry};
pub use transport::Transport;
