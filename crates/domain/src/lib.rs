//! `nl-domain`: configuration types shared by the nodelink crates.
//!
//! The client engine lives in `nl-client`; keeping the config structs here
//! lets an embedding application deserialize its `[ipc]` section without
//! pulling in the runtime.

pub mod config;

pub use config::{ClientConfig, ConfigError, ConfigSeverity};
