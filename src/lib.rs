pub mod cli;
pub mod config;
pub mod daemon;
pub mod decision;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod pause;
pub mod pending;
pub mod transport;
