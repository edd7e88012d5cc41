//! Polling of remote tasks until a terminal outcome.
//!
//! A [`PollingSession`] holds one task's state and guarantees a single
//! terminal [`PollEvent`]; a [`PollingStrategy`] drives it.

mod events;
mod session;
mod strategy;

pub use events::{PollEvent, PollProgress};
pub use session::{PollingSession, SessionContext};
pub use strategy::{strategy_for, LegacyPolling, PollingStrategy, StandardPolling};
