pub mod convert;
pub mod handlers;
pub mod serve;
pub mod state;
