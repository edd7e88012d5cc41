//! Utility functions for timestamps and duration formatting.

pub mod timestamps;

pub use timestamps::{duration_ms, format_duration, iso_timestamp, now_utc, Timestamp};
