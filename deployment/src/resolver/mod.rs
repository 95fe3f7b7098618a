//! Component and dependency resolution
//!
//! Resolution happens in two layers. The component resolver answers "which
//! version of this one component can the device supply" from what is
//! already running and from the local recipe store. The dependency resolver
//! drives it across a whole deployment: merging root components from every
//! scope, walking recipe dependencies and falling back to the cloud
//! registry for anything the device cannot satisfy on its own.

pub mod component;
pub mod dependency;
