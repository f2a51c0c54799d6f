pub mod handoff_check;
pub mod ingester;
