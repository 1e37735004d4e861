pub mod api;
pub mod config;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod network;
pub mod occupancy;
pub mod sensor;
pub mod state;
pub mod telemetry;
