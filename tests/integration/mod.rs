//! Integration tests for stately
//!
//! These tests drive registration, dispatch and the devtools mirror together.

#[path = "../common/mod.rs"]
pub mod common;

pub mod actions;
pub mod derivations;
pub mod devtools;
