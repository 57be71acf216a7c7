//! Schemas for the supported device models

pub mod fan;
pub mod humidifier;

pub use fan::{FanProp, FanSchema};
pub use humidifier::{HumidifierProp, HumidifierSchema};
