//! Channels Bridge
//!
//! Device-adapter layer that keeps a live, eventually-consistent mirror of a
//! Channels app instance by polling its HTTP API, and that translates
//! playback commands into API calls against the same device.
//!
//! This library provides:
//! - `client` - HTTP transport for the Channels API with error classification
//! - `status` - typed playback snapshots and snapshot diffing
//! - `adapter` - connection state machine, polling loop, command dispatch
//! - `bus` - broadcast bus delivering change events to the entity layer

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod adapter;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod status;
