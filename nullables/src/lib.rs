//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano.
//! The runtime reaches the outside world through two seams: the
//! [`shoal_types::Clock`] trait and the [`shoal_network::Transport`] trait.
//! This crate provides test-friendly implementations of both that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch a socket
//!
//! Usage: swap the system clock and the HTTP transport for these in tests.

pub mod clock;
pub mod network;

pub use clock::NullClock;
pub use network::NullNetwork;
