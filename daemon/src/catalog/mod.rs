//! Release catalog

pub mod releases;
