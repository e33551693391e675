mod client;

pub use convai_realtime_types as types;
pub use client::{
    connect, connect_with_config, Client, Config, ConfigBuilder, ConvaiClient, ServerRx, Stats,
    Target,
};
