//! Test doubles for collaborators and stores
//!
//! Used by integration tests and the demo binary.

/// Scripted fakes
pub mod fakes;

pub use fakes::*;
