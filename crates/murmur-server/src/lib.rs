//! Library half of the murmur server, shared by the binary and the
//! integration tests.

pub mod config;
mod connection;
pub mod handlers;
pub mod metrics;
mod polling;
