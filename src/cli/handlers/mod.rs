//! CLI command handlers
//!
//! - sync: sync, watch, refresh
//! - info: stats, delegators, summary, status, config

pub mod info;
pub mod sync;

pub use info::*;
pub use sync::*;
