//! Inspect and stop model services of the active stack's deployer.

use anyhow::{Context, Result};
use clap::Subcommand;
use mlstack_core::deployer::{ModelDeployer, Service, ServiceQuery};
use std::time::Duration;

use super::seldon::stop_last_service;
use super::{activate, load_config};
use crate::demo::{DEPLOYER_STEP, DEPLOYMENT_PIPELINE};

#[derive(Debug, Subcommand)]
pub enum ServicesCommand {
    /// List model services
    List {
        /// Only services deployed by this pipeline
        #[arg(long)]
        pipeline: Option<String>,
        /// Only services deployed by this step
        #[arg(long)]
        step: Option<String>,
        /// Only running services
        #[arg(long)]
        running: bool,
    },
    /// Stop the most recent running service of a pipeline step
    Stop {
        #[arg(long, default_value = DEPLOYMENT_PIPELINE)]
        pipeline: String,
        #[arg(long, default_value = DEPLOYER_STEP)]
        step: String,
        /// Seconds to wait for the service to stop
        #[arg(long, default_value = "100")]
        timeout: u64,
    },
}

pub async fn run(config_path: &str, command: ServicesCommand) -> Result<()> {
    let config = load_config(config_path)?;
    let stack = activate(&config).await?;
    let deployer = stack
        .model_deployer("services")
        .context("The active stack has no model deployer")?
        .as_deployer();

    match command {
        ServicesCommand::List {
            pipeline,
            step,
            running,
        } => {
            let query = ServiceQuery {
                pipeline_name: pipeline,
                step_name: step,
                model_name: None,
                running_only: running,
            };
            let services = list(deployer, &query).await?;
            if services.is_empty() {
                println!("No services found");
            }
            for service in &services {
                println!("{}", describe(service));
            }
        }
        ServicesCommand::Stop {
            pipeline,
            step,
            timeout,
        } => {
            match stop_last_service(deployer, &pipeline, &step, Duration::from_secs(timeout))
                .await?
            {
                Some(service) => println!("Stopped {}", describe(&service)),
                None => println!("No running service for {pipeline}/{step}"),
            }
        }
    }
    Ok(())
}

/// Matching services, most recently updated first.
async fn list(deployer: &dyn ModelDeployer, query: &ServiceQuery) -> Result<Vec<Service>> {
    let mut services = deployer
        .find_services(query)
        .await
        .context("Failed to query model services")?;
    services.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(services)
}

fn describe(service: &Service) -> String {
    format!(
        "{} {}/{} model={} status={:?} url={}",
        service.id,
        service.pipeline_name,
        service.step_name,
        service.model_name,
        service.status,
        service.prediction_url.as_deref().unwrap_or("-"),
    )
}
