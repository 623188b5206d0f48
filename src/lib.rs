//! Node-resident build execution agent.
//!
//! Runs the unit scripts the remote job service assigns to this node, reports their status and
//! ships their console output back, and terminates them when the service asks to cancel or
//! time them out.
pub mod cli;
pub mod command;
pub mod config;
pub mod console;
pub mod event;
pub mod group;
pub mod http;
pub mod logging;
pub mod status;
pub mod supervisor;
pub mod watcher;
