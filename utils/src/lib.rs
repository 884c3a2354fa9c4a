//! Shared utilities for the Shoal network.

pub mod logging;
pub mod sorted;
pub mod time;

pub use logging::{init_test_tracing, init_tracing};
pub use sorted::{insert_sorted, remove_sorted};
pub use time::{format_duration, format_millis};
