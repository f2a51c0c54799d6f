//! fleetdeck library
//!
//! Release delivery for a fleet of Kubernetes downstreams: release catalog,
//! per-downstream version timelines, preflight gating, delivery channels and
//! the dashboard view.

pub mod app;
pub mod catalog;
pub mod delivery;
pub mod errors;
pub mod executor;
pub mod filesys;
pub mod gate;
pub mod install;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod status;
pub mod storage;
pub mod utils;
pub mod workers;
