use crate::accessory::Control;
use crate::property::{Access, PropertyConfig, PropertyFormat, ValueListItem, ValueRange};
use crate::schema::{DeviceSchema, SchemaRegistry};

pub const MODEL: &str = "zhimi.humidifier.ca4";

crate::property_keys! {
    pub enum HumidifierProp {
        Power => "power",
        Mode => "mode",
        TargetHumidity => "target_humidity",
        WaterLevel => "water_level",
        RelativeHumidity => "relative_humidity",
    }
}

/// Evaporative humidifier
#[derive(Debug, Default)]
pub struct HumidifierSchema;

impl DeviceSchema for HumidifierSchema {
    type Prop = HumidifierProp;

    fn model(&self) -> &str {
        MODEL
    }

    fn init_device_properties(&self, registry: &mut SchemaRegistry<HumidifierProp>) {
        registry.add_property(
            HumidifierProp::Power,
            PropertyConfig::new(2, 1, PropertyFormat::Bool).access(Access::READ_WRITE),
        );
        registry.add_property(
            HumidifierProp::Mode,
            PropertyConfig::new(2, 5, PropertyFormat::Enum)
                .access(Access::READ_WRITE)
                .list(vec![
                    ValueListItem::new(0, "Auto"),
                    ValueListItem::new(1, "Low"),
                    ValueListItem::new(2, "Medium"),
                    ValueListItem::new(3, "High"),
                ]),
        );
        registry.add_property(
            HumidifierProp::TargetHumidity,
            PropertyConfig::new(2, 6, PropertyFormat::Int)
                .access(Access::READ_WRITE)
                .unit("percentage")
                .range(ValueRange::new(30.0, 80.0).with_step(10.0)),
        );
        registry.add_property(
            HumidifierProp::WaterLevel,
            PropertyConfig::new(2, 7, PropertyFormat::Int)
                .access(Access::READ)
                .range(ValueRange::new(0.0, 128.0).with_step(1.0)),
        );
        registry.add_property(
            HumidifierProp::RelativeHumidity,
            PropertyConfig::new(3, 7, PropertyFormat::Int)
                .access(Access::READ)
                .unit("percentage")
                .range(ValueRange::new(0.0, 100.0).with_step(1.0)),
        );
    }

    fn init_device_capabilities(&self, registry: &mut SchemaRegistry<HumidifierProp>) {
        registry.add_capability("target_humidity_min", 30);
        registry.add_capability("target_humidity_max", 80);
        registry.add_capability("water_tank", true);
    }
}

pub fn controls() -> Vec<Control<HumidifierProp>> {
    vec![
        Control::switch("Active", HumidifierProp::Power),
        Control::level("Relative Humidity Humidifier Threshold", HumidifierProp::TargetHumidity),
        Control::sensor("Current Relative Humidity", HumidifierProp::RelativeHumidity),
        Control::sensor("Water Level", HumidifierProp::WaterLevel),
    ]
}
