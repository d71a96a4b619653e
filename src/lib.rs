//! scirun - job staging, resumable artifacts, and crash-safe artifact sync
//! for autonomous research agents

pub mod adapters;
pub mod artifacts;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod idea;
pub mod interrupt;
pub mod job;
pub mod launch;
pub mod resume;
pub mod stage;
pub mod submission;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod verifier;
pub mod viewer;
