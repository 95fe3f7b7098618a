//! Data model for the deployment core

pub mod component;
pub mod deployment;
pub mod recipe;
pub mod version;
