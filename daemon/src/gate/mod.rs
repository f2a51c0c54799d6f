//! Preflight gate

pub mod preflight;
pub mod runner;
pub mod service;
