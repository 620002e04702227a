// Library exports for the Overseer process supervisor

pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod monitor;
pub mod process;
pub mod resource;
pub mod state;
pub mod watcher;
