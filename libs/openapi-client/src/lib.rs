//! Wire models consumed from fleetdeck's collaborators

pub mod models;
