use crate::accessory::Control;
use crate::device::Device;
use crate::error::Result;
use crate::property::{Access, PropertyConfig, PropertyFormat, ValueListItem, ValueRange};
use crate::schema::{DeviceSchema, SchemaRegistry};
use futures_util::future::BoxFuture;

pub const MODEL: &str = "zhimi.fan.za4";

crate::property_keys! {
    /// Properties of the standing fan
    pub enum FanProp {
        Power => "power",
        FanLevel => "fan_level",
        Swing => "swing",
        Mode => "mode",
        Temperature => "temperature",
        ChildLock => "child_lock",
    }
}

/// Smart standing fan with three speed levels
#[derive(Debug, Default)]
pub struct FanSchema;

impl DeviceSchema for FanSchema {
    type Prop = FanProp;

    fn model(&self) -> &str {
        MODEL
    }

    fn init_device_properties(&self, registry: &mut SchemaRegistry<FanProp>) {
        registry.add_property(
            FanProp::Power,
            PropertyConfig::new(2, 1, PropertyFormat::Bool).access(Access::READ_WRITE),
        );
        registry.add_property(
            FanProp::FanLevel,
            PropertyConfig::new(2, 2, PropertyFormat::Int)
                .access(Access::READ_WRITE)
                .range(ValueRange::new(1.0, 3.0).with_step(1.0)),
        );
        registry.add_property(
            FanProp::Swing,
            PropertyConfig::new(2, 3, PropertyFormat::Bool).access(Access::READ_WRITE),
        );
        registry.add_property(
            FanProp::Mode,
            PropertyConfig::new(2, 7, PropertyFormat::Enum)
                .access(Access::READ_WRITE)
                .list(vec![
                    ValueListItem::new(0, "Natural Wind"),
                    ValueListItem::new(1, "Straight Wind"),
                ]),
        );
        registry.add_property(
            FanProp::Temperature,
            PropertyConfig::new(3, 7, PropertyFormat::Float)
                .access(Access::READ)
                .unit("celsius")
                .range(ValueRange::new(-30.0, 100.0).with_step(0.1)),
        );
        registry.add_property(
            FanProp::ChildLock,
            PropertyConfig::new(7, 1, PropertyFormat::Bool).access(Access::READ_WRITE),
        );
    }

    fn init_device_capabilities(&self, registry: &mut SchemaRegistry<FanProp>) {
        registry.add_capability("fan_levels", 3);
        registry.add_capability("swing", true);
        registry.add_capability("natural_mode", true);
    }

    fn device_specific_setup<'a>(&'a self, device: &'a Device<Self>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::info!(
                "[{}] Fan {} with {} speed levels",
                device.name(),
                device.device_id().unwrap_or_default(),
                device.capability("fan_levels").cloned().unwrap_or_default()
            );
            Ok(())
        })
    }
}

/// Controls exposed for the fan accessory
pub fn controls() -> Vec<Control<FanProp>> {
    vec![
        Control::switch("On", FanProp::Power),
        Control::level("Rotation Speed", FanProp::FanLevel),
        Control::switch("Swing Mode", FanProp::Swing),
        Control::switch("Lock Physical Controls", FanProp::ChildLock),
        Control::sensor("Current Temperature", FanProp::Temperature),
    ]
}
