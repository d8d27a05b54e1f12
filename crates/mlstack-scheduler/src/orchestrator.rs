//! Pipeline orchestrator - executes pipeline steps in dependency order.

use chrono::Utc;
use mlstack_core::artifact::{Artifact, ArtifactKey, ArtifactStore, ArtifactType, MaterializedArtifact};
use mlstack_core::entity::{
    ArtifactModel, ComponentModel, PipelineModel, RunModel, RunStatus, StackModel, StepRunModel,
    StepStatus,
};
use mlstack_core::{ComponentKind, Error, ResourceId, Result, StepEnvironment};
use mlstack_stack::{Stack, StepInputs, invoke_step};
use mlstack_store::{ZenStore, ZenStoreExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Pipeline, StepSpec};

/// Name under which a step's output is stored.
const OUTPUT_NAME: &str = "output";

/// State of a step during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Pending,
    Running,
    Succeeded { artifact_id: ResourceId },
    Failed { message: String },
    Skipped { reason: String },
}

impl StepState {
    pub fn is_success(&self) -> bool {
        matches!(self, StepState::Succeeded { .. })
    }
}

/// Event emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    RunStarted { run_id: ResourceId },
    StepStarted { step: String },
    StepCompleted { step: String, success: bool },
    StepSkipped { step: String, reason: String },
    PipelineCompleted { success: bool },
}

/// Result of a pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: ResourceId,
    pub success: bool,
    pub step_states: HashMap<String, StepState>,
    /// Outputs of the steps that succeeded.
    pub outputs: BTreeMap<String, MaterializedArtifact>,
    /// The first error that stopped a step or the run.
    pub error: Option<Error>,
}

impl PipelineResult {
    /// Decode the output of `step`, if it produced one.
    pub fn output<T: ArtifactType>(&self, step: &str) -> Result<Option<T>> {
        self.outputs.get(step).map(|a| a.decode()).transpose()
    }

    /// The first error, if the run failed.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Writes pipeline, stack, run, step and artifact records to the active
/// store. Every method is a no-op when the stack has no store.
struct Recorder<'a> {
    store: Option<&'a dyn ZenStore>,
    pipeline_id: Option<ResourceId>,
    run: Option<(ResourceId, RunModel)>,
}

impl<'a> Recorder<'a> {
    async fn start(
        store: Option<&'a dyn ZenStore>,
        stack: &Stack,
        pipeline: &Pipeline,
        run_id: ResourceId,
    ) -> Result<Self> {
        let mut recorder = Self {
            store,
            pipeline_id: None,
            run: None,
        };
        let Some(store) = store else {
            return Ok(recorder);
        };

        let pipeline_model = PipelineModel {
            steps: pipeline.steps().iter().map(|s| s.name.clone()).collect(),
        };
        let entity = store
            .get_or_create(pipeline.name(), None, &pipeline_model)
            .await?;
        if entity.decode::<PipelineModel>()? != pipeline_model {
            store.update_model(entity.id, &pipeline_model).await?;
        }
        recorder.pipeline_id = Some(entity.id);

        let mut components = BTreeMap::new();
        for (slot, name, component) in stack.components() {
            let model = ComponentModel {
                kind: component.kind(),
                flavor: component.flavor().to_string(),
            };
            store.get_or_create(name, None, &model).await?;
            components.insert(slot, name.to_string());
        }
        let stack_model = StackModel { components };
        let entity = store.get_or_create(stack.name(), None, &stack_model).await?;
        if entity.decode::<StackModel>()? != stack_model {
            store.update_model(entity.id, &stack_model).await?;
        }

        let run = RunModel {
            pipeline_name: pipeline.name().to_string(),
            stack_name: stack.name().to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        let entity = store
            .create_model(&run_id.to_string(), recorder.pipeline_id, &run)
            .await?;
        recorder.run = Some((entity.id, run));
        Ok(recorder)
    }

    fn run_entity(&self) -> Option<ResourceId> {
        self.run.as_ref().map(|(id, _)| *id)
    }

    fn step_model(spec: &StepSpec, status: StepStatus) -> Result<StepRunModel> {
        Ok(StepRunModel {
            status,
            started_at: None,
            finished_at: None,
            error: None,
            config: serde_json::to_value(&spec.config)?,
            inputs: spec.inputs.iter().cloned().collect(),
        })
    }

    async fn step_started(&self, spec: &StepSpec) -> Result<Option<(ResourceId, StepRunModel)>> {
        let Some(store) = self.store else {
            return Ok(None);
        };
        let mut model = Self::step_model(spec, StepStatus::Running)?;
        model.started_at = Some(Utc::now());
        let entity = store
            .create_model(&spec.name, self.run_entity(), &model)
            .await?;
        Ok(Some((entity.id, model)))
    }

    async fn step_skipped(&self, spec: &StepSpec, reason: &str) -> Result<()> {
        let Some(store) = self.store else {
            return Ok(());
        };
        let mut model = Self::step_model(spec, StepStatus::Skipped)?;
        model.error = Some(reason.to_string());
        store
            .create_model(&spec.name, self.run_entity(), &model)
            .await?;
        Ok(())
    }

    async fn step_finished(
        &self,
        step: Option<(ResourceId, StepRunModel)>,
        status: StepStatus,
        error: Option<String>,
    ) -> Result<()> {
        let (Some(store), Some((id, mut model))) = (self.store, step) else {
            return Ok(());
        };
        model.status = status;
        model.error = error;
        model.finished_at = Some(Utc::now());
        store.update_model(id, &model).await?;
        Ok(())
    }

    /// Record the output of a step; returns the artifact record id.
    async fn artifact(
        &self,
        step: Option<ResourceId>,
        artifact: &Artifact,
        uri: Option<String>,
        checksum: String,
    ) -> Result<ResourceId> {
        let Some(store) = self.store else {
            return Ok(ResourceId::new());
        };
        let model = ArtifactModel {
            type_name: artifact.type_name.clone(),
            uri,
            checksum,
        };
        Ok(store.create_model(OUTPUT_NAME, step, &model).await?.id)
    }

    async fn finish(&mut self, success: bool) -> Result<()> {
        let (Some(store), Some((id, run))) = (self.store, self.run.as_mut()) else {
            return Ok(());
        };
        run.status = if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        run.finished_at = Some(Utc::now());
        store.update_model(*id, &*run).await?;
        Ok(())
    }
}

/// Orchestrates the execution of a pipeline.
pub struct PipelineOrchestrator {
    stack: Arc<Stack>,
}

impl PipelineOrchestrator {
    pub fn new(stack: Arc<Stack>) -> Self {
        Self { stack }
    }

    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    /// Execute a pipeline, returning a channel of events and a handle to get the final result.
    pub fn execute(
        &self,
        pipeline: &Pipeline,
    ) -> (
        mpsc::Receiver<PipelineEvent>,
        tokio::task::JoinHandle<PipelineResult>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let stack = self.stack.clone();
        let pipeline = pipeline.clone();

        let handle = tokio::spawn(async move { Self::execute_inner(stack, pipeline, tx).await });

        (rx, handle)
    }

    /// Execute a pipeline and wait for it to finish.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<PipelineResult> {
        let (mut rx, handle) = self.execute(pipeline);
        while let Some(event) = rx.recv().await {
            debug!(?event, "pipeline event");
        }
        handle
            .await
            .map_err(|e| Error::ExecutionFailed(format!("pipeline task failed: {e}")))
    }

    /// Internal execution logic
    async fn execute_inner(
        stack: Arc<Stack>,
        pipeline: Pipeline,
        tx: mpsc::Sender<PipelineEvent>,
    ) -> PipelineResult {
        let run_id = ResourceId::new();
        let mut result = PipelineResult {
            run_id,
            success: false,
            step_states: pipeline
                .steps()
                .iter()
                .map(|s| (s.name.clone(), StepState::Pending))
                .collect(),
            outputs: BTreeMap::new(),
            error: None,
        };

        let prepared = Self::prepare(&stack, &pipeline, run_id).await;
        let (mut recorder, artifact_store) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(pipeline = %pipeline.name(), error = %e, "Pipeline could not start");
                result.error = Some(e);
                let _ = tx.send(PipelineEvent::PipelineCompleted { success: false }).await;
                return result;
            }
        };
        info!(pipeline = %pipeline.name(), run = %run_id, stack = %stack.name(), "Pipeline run started");
        let _ = tx.send(PipelineEvent::RunStarted { run_id }).await;

        for spec in pipeline.ordered_steps() {
            let blocked: Vec<&str> = spec
                .upstream()
                .filter(|u| !result.step_states.get(*u).is_some_and(StepState::is_success))
                .collect();
            if !blocked.is_empty() {
                let reason = format!("upstream steps did not succeed: {}", blocked.join(", "));
                info!(step = %spec.name, ?blocked, "Skipping step due to failed dependencies");
                if let Err(e) = recorder.step_skipped(spec, &reason).await {
                    warn!(step = %spec.name, error = %e, "failed to record skipped step");
                }
                result
                    .step_states
                    .insert(spec.name.clone(), StepState::Skipped { reason: reason.clone() });
                let _ = tx
                    .send(PipelineEvent::StepSkipped {
                        step: spec.name.clone(),
                        reason,
                    })
                    .await;
                continue;
            }

            result
                .step_states
                .insert(spec.name.clone(), StepState::Running);
            let _ = tx
                .send(PipelineEvent::StepStarted {
                    step: spec.name.clone(),
                })
                .await;

            let outcome = Self::execute_step(
                &stack,
                &recorder,
                artifact_store,
                &pipeline,
                spec,
                run_id,
                &result.outputs,
            )
            .await;
            let success = match outcome {
                Ok(materialized) => {
                    info!(step = %spec.name, artifact = %materialized.id, "Step completed successfully");
                    result.step_states.insert(
                        spec.name.clone(),
                        StepState::Succeeded {
                            artifact_id: materialized.id,
                        },
                    );
                    result.outputs.insert(spec.name.clone(), materialized);
                    true
                }
                Err(e) => {
                    error!(step = %spec.name, error = %e, "Step failed");
                    result.step_states.insert(
                        spec.name.clone(),
                        StepState::Failed {
                            message: e.to_string(),
                        },
                    );
                    result.error.get_or_insert(e);
                    false
                }
            };
            let _ = tx
                .send(PipelineEvent::StepCompleted {
                    step: spec.name.clone(),
                    success,
                })
                .await;
        }

        result.success = result.step_states.values().all(StepState::is_success);
        if let Err(e) = recorder.finish(result.success).await {
            error!(run = %run_id, error = %e, "failed to record run status");
            result.success = false;
            result.error.get_or_insert(e);
        }
        info!(pipeline = %pipeline.name(), run = %run_id, success = result.success, "Pipeline run finished");
        let _ = tx
            .send(PipelineEvent::PipelineCompleted {
                success: result.success,
            })
            .await;
        result
    }

    /// Resolve the optional store and artifact store and open the run
    /// record.
    async fn prepare<'a>(
        stack: &'a Stack,
        pipeline: &Pipeline,
        run_id: ResourceId,
    ) -> Result<(Recorder<'a>, Option<&'a dyn ArtifactStore>)> {
        let store = if stack.has(ComponentKind::Store) {
            Some(stack.store(pipeline.name())?.as_store())
        } else {
            None
        };
        let artifact_store = if stack.has(ComponentKind::ArtifactStore) {
            Some(stack.artifact_store(pipeline.name())?.as_artifact_store())
        } else {
            None
        };
        let recorder = Recorder::start(store, stack, pipeline, run_id).await?;
        Ok((recorder, artifact_store))
    }

    /// Execute a single step and materialize its output.
    async fn execute_step(
        stack: &Arc<Stack>,
        recorder: &Recorder<'_>,
        artifact_store: Option<&dyn ArtifactStore>,
        pipeline: &Pipeline,
        spec: &StepSpec,
        run_id: ResourceId,
        outputs: &BTreeMap<String, MaterializedArtifact>,
    ) -> Result<MaterializedArtifact> {
        let mut inputs = StepInputs::new();
        for (param, upstream) in &spec.inputs {
            let artifact = outputs.get(upstream).ok_or_else(|| {
                Error::InvalidPipeline(format!("output of `{upstream}` is not available"))
            })?;
            inputs.insert(param.clone(), artifact.clone());
        }

        let record = recorder.step_started(spec).await?;
        let step_entity = record.as_ref().map(|(id, _)| *id);
        let env = StepEnvironment::new(pipeline.name(), &spec.name, run_id);

        let outcome = invoke_step(
            spec.step.as_ref(),
            env,
            &spec.config,
            inputs,
            stack.clone(),
        )
        .await;
        let mut outcome = match outcome {
            Ok(artifact) => {
                Self::materialize(recorder, artifact_store, spec, run_id, step_entity, artifact)
                    .await
            }
            Err(e) => Err(e),
        };
        if outcome.is_ok() {
            if let Err(e) = recorder
                .step_finished(record.clone(), StepStatus::Completed, None)
                .await
            {
                outcome = Err(e);
            }
        }

        match outcome {
            Ok(materialized) => {
                debug!(
                    step = %spec.name,
                    artifact = %materialized.id,
                    uri = ?materialized.uri,
                    "materialized step output"
                );
                Ok(materialized)
            }
            Err(e) => {
                if let Err(record_err) = recorder
                    .step_finished(record, StepStatus::Failed, Some(e.to_string()))
                    .await
                {
                    warn!(step = %spec.name, error = %record_err, "failed to record step failure");
                }
                Err(e)
            }
        }
    }

    /// Store a step's output and record it under the step entity.
    async fn materialize(
        recorder: &Recorder<'_>,
        artifact_store: Option<&dyn ArtifactStore>,
        spec: &StepSpec,
        run_id: ResourceId,
        step_entity: Option<ResourceId>,
        artifact: Artifact,
    ) -> Result<MaterializedArtifact> {
        let (uri, checksum) = match artifact_store {
            Some(store) => {
                let key = ArtifactKey {
                    run_id,
                    step: spec.name.clone(),
                    name: OUTPUT_NAME.to_string(),
                };
                let stored = store.put(&key, artifact.to_bytes()?).await?;
                (Some(stored.uri), stored.checksum)
            }
            None => (None, artifact.checksum()?),
        };
        let id = recorder
            .artifact(step_entity, &artifact, uri.clone(), checksum.clone())
            .await?;
        Ok(MaterializedArtifact {
            id,
            artifact,
            uri,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepSpec;
    use mlstack_core::entity::{EntityFilter, EntityKind};
    use mlstack_core::params::{ConfigSchema, ParamSpec};
    use mlstack_stack::steps::{deployment_trigger_step, model_deployer_step};
    use mlstack_stack::{
        ActiveArtifactStore, ActiveModelDeployer, ActiveStore, FnStep, StackComponent,
    };
    use mlstack_deployer::LocalModelDeployer;
    use mlstack_store::{LocalArtifactStore, LocalStore};

    fn constant(value: f64) -> FnStep {
        FnStep::new(ConfigSchema::new(), move |_| async move { Artifact::new(&value) })
    }

    fn doubler() -> FnStep {
        FnStep::new(
            ConfigSchema::new().param(ParamSpec::float("factor").default_value(2.0)),
            |ctx| async move {
                let x: f64 = ctx.inputs.require(ctx.step_name(), "x")?;
                Artifact::new(&(x * ctx.config.require_float("factor")?))
            },
        )
    }

    fn failing() -> FnStep {
        FnStep::new(ConfigSchema::new(), |_| async {
            Err::<Artifact, _>(Error::ExecutionFailed("boom".into()))
        })
    }

    fn full_stack(dir: &std::path::Path) -> Arc<Stack> {
        Arc::new(
            Stack::new("dev")
                .with_component(
                    ComponentKind::Store,
                    "db",
                    StackComponent::Store(ActiveStore::Local(LocalStore::in_memory())),
                )
                .with_component(
                    ComponentKind::ArtifactStore,
                    "artifacts",
                    StackComponent::ArtifactStore(ActiveArtifactStore::Local(
                        LocalArtifactStore::new(dir),
                    )),
                ),
        )
    }

    fn store(stack: &Stack) -> &dyn ZenStore {
        stack.store("test").unwrap().as_store()
    }

    #[tokio::test]
    async fn test_runs_in_order_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let stack = full_stack(dir.path());
        let pipeline = Pipeline::builder("arith")
            .step(StepSpec::new("double", doubler()).input("x", "load"))
            .step(StepSpec::new("load", constant(21.0)))
            .build()
            .unwrap();

        let orchestrator = PipelineOrchestrator::new(stack.clone());
        let (mut rx, handle) = orchestrator.execute(&pipeline);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let result = handle.await.unwrap();

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output::<f64>("double").unwrap(), Some(42.0));
        let stored = &result.outputs["double"];
        assert!(stored.uri.as_deref().unwrap().starts_with("file://"));
        assert_eq!(
            &events[1..],
            &[
                PipelineEvent::StepStarted { step: "load".into() },
                PipelineEvent::StepCompleted { step: "load".into(), success: true },
                PipelineEvent::StepStarted { step: "double".into() },
                PipelineEvent::StepCompleted { step: "double".into(), success: true },
                PipelineEvent::PipelineCompleted { success: true },
            ]
        );

        let store = store(&stack);
        let runs = store.list(EntityKind::Run, &EntityFilter::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        let run: RunModel = runs[0].decode().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stack_name, "dev");

        let steps = store
            .list(EntityKind::Step, &EntityFilter::parent(runs[0].id))
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        for step in &steps {
            assert_eq!(step.decode::<StepRunModel>().unwrap().status, StepStatus::Completed);
        }
        let artifact = store.get(EntityKind::Artifact, stored.id).await.unwrap();
        let model: ArtifactModel = artifact.decode().unwrap();
        assert_eq!(model.checksum, stored.checksum);
        assert_eq!(model.type_name, "float");

        let components = store
            .list(EntityKind::Component, &EntityFilter::default())
            .await
            .unwrap();
        assert_eq!(components.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_skips_downstream_and_keeps_error() {
        let dir = tempfile::tempdir().unwrap();
        let stack = full_stack(dir.path());
        let pipeline = Pipeline::builder("broken")
            .step(StepSpec::new("load", failing()))
            .step(StepSpec::new("double", doubler()).input("x", "load"))
            .step(StepSpec::new("independent", constant(1.0)))
            .build()
            .unwrap();

        let result = PipelineOrchestrator::new(stack.clone())
            .run(&pipeline)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.step_states["load"], StepState::Failed { .. }));
        assert!(matches!(result.step_states["double"], StepState::Skipped { .. }));
        assert!(result.step_states["independent"].is_success());
        assert!(matches!(result.error, Some(Error::ExecutionFailed(ref m)) if m == "boom"));

        let runs = store(&stack)
            .list(EntityKind::Run, &EntityFilter::default())
            .await
            .unwrap();
        assert_eq!(runs[0].decode::<RunModel>().unwrap().status, RunStatus::Failed);

        let err = result.into_result().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_marks_step_failed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the artifact directory should be.
        let blocked = dir.path().join("artifacts");
        std::fs::write(&blocked, b"").unwrap();
        let stack = full_stack(&blocked);
        let pipeline = Pipeline::builder("unstorable")
            .step(StepSpec::new("load", constant(1.0)))
            .build()
            .unwrap();

        let result = PipelineOrchestrator::new(stack.clone())
            .run(&pipeline)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.step_states["load"], StepState::Failed { .. }));
        assert!(result.outputs.is_empty());

        let store = store(&stack);
        let steps = store
            .list(EntityKind::Step, &EntityFilter::name("load"))
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        let step: StepRunModel = steps[0].decode().unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.error.is_some());
        assert!(step.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_runs_without_store() {
        let pipeline = Pipeline::builder("bare")
            .step(StepSpec::new("load", constant(2.0)))
            .step(StepSpec::new("double", doubler()).input("x", "load").param("factor", 3.0))
            .build()
            .unwrap();
        let result = PipelineOrchestrator::new(Arc::new(Stack::new("empty")))
            .run(&pipeline)
            .await
            .unwrap();
        assert_eq!(result.output::<f64>("double").unwrap(), Some(6.0));
        assert!(result.outputs["double"].uri.is_none());
    }

    #[tokio::test]
    async fn test_deploys_only_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        for (accuracy, expect_deployed) in [(0.85, true), (0.75, false)] {
            let stack = Arc::new(
                Stack::new("dev")
                    .with_component(
                        ComponentKind::ArtifactStore,
                        "artifacts",
                        StackComponent::ArtifactStore(ActiveArtifactStore::Local(
                            LocalArtifactStore::new(dir.path()),
                        )),
                    )
                    .with_component(
                        ComponentKind::ModelDeployer,
                        "registry",
                        StackComponent::ModelDeployer(ActiveModelDeployer::Local(
                            LocalModelDeployer::in_memory(),
                        )),
                    ),
            );
            let pipeline = Pipeline::builder("continuous_deployment_pipeline")
                .step(StepSpec::new("trainer", constant(0.5)))
                .step(StepSpec::new("evaluator", constant(accuracy)).after("trainer"))
                .step(
                    StepSpec::new("deployment_trigger", deployment_trigger_step())
                        .input("accuracy", "evaluator")
                        .param("min_accuracy", 0.80),
                )
                .step(
                    StepSpec::new("model_deployer", model_deployer_step())
                        .input("deploy_decision", "deployment_trigger")
                        .input("model", "trainer")
                        .param("model_name", "mnist"),
                )
                .build()
                .unwrap();

            let result = PipelineOrchestrator::new(stack.clone())
                .run(&pipeline)
                .await
                .unwrap()
                .into_result()
                .unwrap();

            assert_eq!(
                result.output::<bool>("deployment_trigger").unwrap(),
                Some(expect_deployed)
            );
            let services = stack
                .model_deployer("test")
                .unwrap()
                .as_deployer()
                .find_services(&Default::default())
                .await
                .unwrap();
            assert_eq!(services.len(), usize::from(expect_deployed));
        }
    }
}
