//! tier3-daemon — POS sidecar for the Tier 3 loyalty decision engine.
//!
//! The daemon owns everything outside the pure decision core: the SQLite
//! store behind the `tier3-core` storage traits, the POSLOYALTY-framed TCP
//! protocol the forecourt POS speaks, and the process scaffolding
//! (configuration, logging, signals).

pub mod config;
pub mod protocol;
pub mod server;
pub mod store;

pub use config::DaemonConfig;
pub use store::SqliteStore;
