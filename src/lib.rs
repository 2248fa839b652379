pub mod config;
pub mod fetch;
pub mod market_data;
pub mod telemetry;
