//! Integration tests for fleetdeck

mod common;

mod test_concurrency;
mod test_gate;
mod test_install;
mod test_scenarios;
mod test_server;
mod test_status;
