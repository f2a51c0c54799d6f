//! Data models

pub mod attempt;
pub mod dashboard;
pub mod downstream;
pub mod release;
