pub mod api;
pub mod config;
pub mod flags;
pub mod metrics;
pub mod properties;
pub mod utils;
