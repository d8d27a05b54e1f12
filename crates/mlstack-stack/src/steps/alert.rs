use async_trait::async_trait;
use mlstack_alerter::{AlertParams, Alerter};
use mlstack_config::VariableContextBuilder;
use mlstack_core::Result;
use mlstack_core::artifact::Artifact;
use mlstack_core::params::{ConfigSchema, ParamSpec};
use tracing::info;

use crate::stack::ActiveAlerter;
use crate::step::{Step, StepContext};

/// Posts a message through the active Slack alerter and returns whether it
/// was delivered.
///
/// The message is the `message` input when the step has one, otherwise the
/// template it was built with. `${pipeline.name}`, `${step.name}` and
/// `${run.id}` are interpolated.
pub struct SlackAlerterPostStep {
    message: String,
}

pub fn slack_alerter_post_step(message: impl Into<String>) -> SlackAlerterPostStep {
    SlackAlerterPostStep {
        message: message.into(),
    }
}

#[async_trait]
impl Step for SlackAlerterPostStep {
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().param(ParamSpec::string("slack_channel_id"))
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        let step = ctx.step_name();
        let template = match ctx.inputs.optional::<String>("message")? {
            Some(message) => message,
            None => self.message.clone(),
        };
        let ActiveAlerter::Slack(slack) = ctx.stack.alerter(step)?;

        let message = VariableContextBuilder::new()
            .with_pipeline(&ctx.env.pipeline_name)
            .with_step(&ctx.env.step_name)
            .with_run(ctx.env.run_id.to_string())
            .build()
            .interpolate(&template);
        let params = AlertParams {
            channel: ctx.config.str("slack_channel_id").map(str::to_string),
        };

        let delivered = slack.post(&message, &params).await;
        info!(step, delivered, "posted alert");
        Artifact::new(&delivered)
    }
}
