//! Cooperative cancellation of polling sessions.
//!
//! Each session owns a [`CancellationToken`]; the orchestrator keeps a
//! [`CancellationSet`] of the nodes the operator cancelled.

mod set;
mod token;

pub use set::CancellationSet;
pub use token::CancellationToken;
