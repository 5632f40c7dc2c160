pub mod api;
pub mod bridge;
pub mod config;
pub mod correlator;
pub mod error;
pub mod files;
pub mod mcp;
pub mod protocol;
pub mod registry;
pub mod repl;
pub mod shutdown;
pub mod task;

pub use bridge::Bridge;
pub use error::BridgeError;
