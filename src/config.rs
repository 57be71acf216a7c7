use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-device configuration as found in the host platform's config file
///
/// ```
/// use miot_bridge::DeviceConfig;
///
/// let config = DeviceConfig::from_json(r#"{"name": "Bedroom fan", "deviceId": "123456"}"#).unwrap();
/// assert_eq!(config.device_id.as_deref(), Some("123456"));
/// assert_eq!(config.polling_interval().as_secs(), 15);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,

    /// Overrides the model declared by the device schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Preferred over the id reported by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Seconds between polls
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

fn default_polling_interval() -> u64 {
    15
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            device_id: None,
            polling_interval: default_polling_interval(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_polling_interval(mut self, seconds: u64) -> Self {
        self.polling_interval = seconds;
        self
    }

    /// Parse a single device entry
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }

    /// Check the fields the device cannot work without
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DeviceError::Config("device name is empty".to_string()));
        }
        if self.polling_interval == 0 {
            return Err(DeviceError::Config(format!(
                "polling interval of {} must be positive",
                self.name
            )));
        }
        if self.device_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(DeviceError::Config(format!(
                "device id of {} is empty",
                self.name
            )));
        }
        Ok(())
    }
}
