//! Realm server host.
//!
//! Wires the lifecycle orchestrator, JSON player storage and the player data
//! domains into a runnable server. The binary in `main.rs` only parses
//! arguments, loads configuration and hands over to [`app::Application`].

pub mod app;
pub mod cli;
pub mod config;
pub mod domains;
pub mod logging;
pub mod modules;
pub mod signals;
pub mod storage;
