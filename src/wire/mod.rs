//! Engine wire protocol

pub mod protocol;

pub use protocol::{ClientMsg, ServerMsg};
