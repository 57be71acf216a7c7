//! Connect to a fan through a local gateway and log its state changes
//!
//! Usage: `cargo run --example poll_fan -- ws://192.168.1.20:8765 [device-id]`

use miot_bridge::models::fan::{self, FanSchema};
use miot_bridge::{
    AccessoryAdapter, Device, DeviceConfig, DeviceError, DeviceEvent, Presenter, WsTransport,
};
use serde_json::Value;
use std::sync::Arc;

struct LogPresenter;

impl Presenter for LogPresenter {
    fn update_control(&self, control: &str, value: &Value) {
        tracing::info!("{} -> {}", control, value);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "miot_bridge=debug,poll_fan=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8765".to_string());

    let mut config = DeviceConfig::new("Demo fan").with_polling_interval(5);
    if let Some(did) = args.next() {
        config = config.with_device_id(did);
    }

    let device = Device::new(FanSchema, config)?;
    let adapter = AccessoryAdapter::new(device.clone(), fan::controls(), Arc::new(LogPresenter));

    let transport = WsTransport::connect(url).await?;
    device.attach(Arc::new(transport)).await;

    let task = adapter.start();
    let mut events = device.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(DeviceEvent::ConnectionChanged(state)) => tracing::info!("Connection: {:?}", state),
                Ok(event) => tracing::debug!("Updated: {:?}", event.property_names()),
                Err(DeviceError::ChannelError(e)) => tracing::debug!("{}", e),
                Err(e) => {
                    tracing::warn!("Event stream ended: {}", e);
                    break;
                }
            }
        }
    }

    task.stop().await;
    device.destroy();
    Ok(())
}
