//! Common test utilities and fixtures for panel-link integration tests
//!
//! This module provides:
//! - A stub daemon on an ephemeral localhost port with a fixed handler set
//! - Session and registry builders using the real WebSocket transport
//! - Polling helpers for asynchronous state

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
