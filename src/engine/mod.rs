//! Local engine process management

pub mod launcher;

pub use launcher::{EngineLauncher, EngineProcess, LaunchError};
