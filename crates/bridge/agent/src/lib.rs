//! The agent-side protocol runtime an editor process embeds to speak the
//! unity-bridge relay protocol.
//!
//! This crate supplements the distilled protocol spec (§4.5): the
//! editor-side tool handlers that actually execute a command are opaque
//! collaborators reached through [`CommandHandler`], but the connection
//! lifecycle, heartbeat response, and reload sequencing around them are
//! part of a complete system and live here. Grounded on the same
//! Handle/Service split the broker and registry crates use, sized down to
//! this process's single logical connection.

pub mod commands;
pub mod config;
pub mod connection;
pub mod reload;
pub mod statusfile;

pub use commands::{CommandHandler, CommandTable};
pub use config::AgentConfig;
pub use connection::{AgentHandle, run};
pub use reload::{ReloadError, ReloadHandler};
pub use statusfile::StatusFileWriter;
