pub mod array_config;

pub use array_config::{
    load_array_config, ArrayConfig, BusSettings, ManualSensor, ManualSettings, MuxSettings,
    ReadingSettings, RegistryMode, SensorSettings,
};
