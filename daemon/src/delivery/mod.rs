//! Delivery channels and their selection

pub mod channel;
pub mod direct;
pub mod handoff;
pub mod selector;
pub mod tool;
