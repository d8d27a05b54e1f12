//! Model deployers for mlstack.
//!
//! Provides deployer implementations:
//! - Seldon Core (`SeldonDeployment` custom resources on Kubernetes)
//! - Local (file-backed service registry for development)

pub mod local;
pub mod seldon;

pub use local::LocalModelDeployer;
pub use mlstack_core::deployer::{
    DeploymentOutcome, DeploymentSpec, ModelDeployer, ModelParameter, Service, ServiceQuery,
    ServiceStatus, load_last_service,
};
pub use seldon::{SeldonConfig, SeldonModelDeployer};
