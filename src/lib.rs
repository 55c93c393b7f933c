//! Bulk Google Workspace administration over the GAM command-line tool.
//!
//! A batch is a [`executor::BulkExecutor`] applied to a list of targets; the
//! [`relay::ProgressRelay`] runs it on a worker thread and hands progress
//! events back to the caller's thread in order.

pub mod acl;
pub mod actions;
pub mod cache;
pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod events;
pub mod executor;
pub mod exit_codes;
pub mod gam;
pub mod journal;
pub mod logging;
pub mod model;
pub mod relay;
pub mod reporter;
pub mod retry;
pub mod targets;
