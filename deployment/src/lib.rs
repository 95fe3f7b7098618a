//! Ember Deployment Library
//!
//! Deployment orchestration core for the Ember edge runtime: queues
//! deployment requests, resolves them into concrete component versions
//! across every scope the device participates in, and drives the lifecycle
//! executor with crash-recoverable state.

pub mod bootstrap;
pub mod cloud;
pub mod errors;
pub mod executor;
pub mod health;
pub mod models;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod utils;
pub mod workers;
