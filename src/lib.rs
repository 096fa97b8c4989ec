#![deny(unreachable_pub)]

//! flowguard: an adaptive firewall control plane for programmable switches.
//!
//! The agent samples a per-device traffic counter over a fixed averaging
//! window, turns the cumulative readings into a rate, and when that rate
//! crosses a configured threshold it removes the device's forwarding rules,
//! reinstalling them once the rate falls back under. Transitions are
//! edge-triggered: a sustained flood blocks a device exactly once.

pub mod config;
pub mod controller;
mod errors;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod rules;
pub mod sampler;
pub mod schema;
pub mod session;
pub mod types;

pub use config::AppConfig;
pub use controller::{Controller, CounterWatch, Shutdown};
pub use errors::{Error, Result, RpcError, SchemaError};
pub use rules::{ApplyReport, RuleSet};
pub use schema::SchemaCatalog;
pub use session::{DeviceSpec, SwitchConnector, SwitchSession};
pub use types::{BlockState, CounterRef, FlowRule, MacAddr, RateSample};
