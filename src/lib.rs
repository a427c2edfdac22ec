//! # patchpilot
//!
//! Durable step orchestration for an AI coding pipeline: open a sandboxed
//! checkout of a repository, let a coding agent modify it, publish the change
//! as a pull request and notify the requester. Runs are checkpointed after
//! every step so a restarted process resumes where it left off.
//!
//! ## Modules
//!
//! - `workflow` - Engine, step pipeline, failure classification, retries, checkpoints
//! - `status` - Pollable run documents, their store and the status projector
//! - `session` - Isolated repository checkouts that steps run commands in
//! - `agent` - The coding agent that edits a checkout
//! - `host` - Repository locators and the pull-request host
//! - `notify` - Completion notifications
//! - `credentials` - Credential references and the in-process vault
//! - `api` - HTTP API for starting and polling runs
//! - `config` - Configuration file and environment overrides
//! - `bootstrap` - Wiring configured collaborators into an engine
//! - `testing` - Mock collaborators and fixtures for tests
pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod error;
pub mod host;
pub mod notify;
pub mod session;
pub mod status;
pub mod workflow;

pub mod testing;
