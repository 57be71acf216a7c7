use thiserror::Error;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur when talking to a MIoT device
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No transport is bound to the device
    #[error("Device not connected")]
    NotConnected,

    /// The presentation layer asked for a value while the device is unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Property is not registered on the device
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// Property does not allow reads
    #[error("Property {0} is not readable")]
    NotReadable(String),

    /// Property does not allow writes
    #[error("Property {0} is not writable")]
    NotWritable(String),

    /// Value cannot be converted to the property's format
    #[error("Invalid value {value} for property {property}")]
    InvalidValue {
        /// Property the value was meant for
        property: String,
        /// Rejected value
        value: serde_json::Value,
    },

    /// Device or gateway answered with an error status
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Status code reported by the device
        code: i64,
        /// Error message reported by the device
        message: String,
    },

    /// Invalid or unexpected response from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid device configuration or schema declaration
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
