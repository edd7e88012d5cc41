//! Testing utilities for reconflow.
//!
//! This module provides:
//! - A scripted in-memory backend implementing the transport seam
//! - Fixtures for fast configurations and common task scripts

pub mod fixtures;
mod mocks;

pub use mocks::{MockBackend, MockReply};
