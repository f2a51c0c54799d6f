//! Downstream registry

pub mod downstreams;
pub mod timeline;
