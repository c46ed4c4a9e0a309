//! Episode driver for a remote first-person game simulation
//!
//! Builds a session configuration from command line flags, connects to the
//! engine and runs agents through observe/act episodes, logging per-step
//! telemetry along the way.

pub mod config;
pub mod engine;
pub mod game;
pub mod session;
pub mod telemetry;
pub mod util;
pub mod wire;
