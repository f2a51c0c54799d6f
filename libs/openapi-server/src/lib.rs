//! Wire models exposed by fleetdeck

pub mod models;
