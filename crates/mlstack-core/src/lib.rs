//! Core domain types and traits for the mlstack pipeline framework.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - Step parameter schemas and validated step configuration
//! - Artifacts, datasets and data profiles
//! - Capability traits for stack components (alerter, data validator,
//!   model deployer, artifact store)
//! - Secret schemas and the secret store abstraction
//! - Metadata store entities

pub mod alerter;
pub mod artifact;
pub mod component;
pub mod dataset;
pub mod deployer;
pub mod entity;
pub mod error;
pub mod id;
pub mod params;
pub mod profile;
pub mod secret;
pub mod step;

pub use component::ComponentKind;
pub use error::{Error, Result};
pub use id::ResourceId;
pub use step::StepEnvironment;
