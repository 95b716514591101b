//! Testing utilities for gameview
//!
//! Provides a capture backend that needs no hardware, for offline runs and
//! the test suite.

pub mod synthetic_data;

pub use synthetic_data::{synthetic_frame, SyntheticDevice};
