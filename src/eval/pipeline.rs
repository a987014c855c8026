//! Per-instance evaluation pipelines.
//!
//! A pipeline is an ordered list of [`EvalStep`]s run for one instance.
//! Steps communicate through a [`PipelineContext`] whose slots may each be
//! written once; every step declares which slots it reads and writes so a
//! pipeline can be checked before it runs.
//!
//! Which pipeline an instance gets depends on its resource mode and the
//! walk phase:
//!
//! | mode    | refresh        | plan        |
//! |---------|----------------|-------------|
//! | managed | none           | managed     |
//! | data    | data refresh   | data plan   |
//!
//! Orphans get destroy-only pipelines.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::addrs::{ResourceAddress, ResourceMode};
use crate::config::ResourceConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{InfraplanError, Result};
use crate::graph::{InstanceNode, OrphanNode};
use crate::planner::diff::InstanceDiff;
use crate::provider::ResourceProvider;
use crate::state::InstanceState;

use super::context::{EvalContext, WalkOperation};
use super::interpolate::ResolvedConfig;

/// Named value a step reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Provider handle.
    Provider,
    /// Resolved configuration.
    Config,
    /// State recorded before this run.
    PriorState,
    /// Computed diff.
    Diff,
    /// State the diff would produce.
    PlannedState,
    /// State produced by reading a data source.
    AppliedState,
}

/// Which snapshot a [`EvalStep::WriteState`] persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// No snapshot; clears whatever was recorded before.
    Nil,
    /// The snapshot read at the start of the run.
    Prior,
    /// The snapshot the diff would produce.
    Planned,
    /// The snapshot read from a data source.
    Applied,
}

/// One step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStep {
    /// Stop when the instance stands in for a count that is not known yet.
    SkipPlaceholder,
    /// Persist a snapshot under the instance's state key.
    WriteState(StateSource),
    /// Resolve the raw configuration.
    Interpolate,
    /// Look up the provider.
    GetProvider,
    /// Re-validate the resolved configuration with the provider.
    ValidateResource,
    /// Read the recorded snapshot.
    ReadState,
    /// Stop when the configuration is not fully known and a prior
    /// snapshot exists, keeping that snapshot and dropping any stale diff.
    DeferIfUnknownWithPriorState,
    /// Ask the provider for a diff.
    Diff,
    /// Fail if the diff destroys a guarded resource.
    CheckPreventDestroy,
    /// Persist the diff.
    WriteDiff,
    /// Stop when a data source cannot be read yet.
    DeferIfUnresolved,
    /// Ask the provider for a data-source read diff.
    ReadDataDiff,
    /// Perform the data-source read.
    ReadDataApply,
    /// Stop when the data source was already read during refresh.
    SkipIfAlreadyRead,
    /// Build a destroy diff for an orphan.
    DiffDestroy,
    /// Remove the instance's state entry.
    RemoveState,
}

/// Signal returned by each step.
#[derive(Debug)]
pub enum StepOutcome {
    /// Run the next step.
    Continue,
    /// End the pipeline without failing the node.
    StopSuccessfully,
    /// End the pipeline and fail the node.
    Fail(InfraplanError),
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every step ran.
    Completed,
    /// A step deferred the rest of the work.
    Deferred,
    /// A step failed.
    Failed,
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// How the run ended.
    pub outcome: PipelineOutcome,
    /// Everything reported along the way.
    pub diagnostics: Diagnostics,
    /// Names of the steps that ran, in order.
    pub steps_run: Vec<&'static str>,
}

/// The instance a pipeline evaluates.
#[derive(Debug, Clone)]
pub struct PipelineSubject {
    /// Instance address.
    pub address: ResourceAddress,
    /// Declaration, absent for orphans of removed resources.
    pub config: Option<Arc<ResourceConfig>>,
    /// Provider name.
    pub provider: String,
    /// Dependencies recorded alongside the state.
    pub dependencies: Vec<String>,
    /// Stands in for instances of a resource whose count is unknown.
    pub placeholder: bool,
}

/// An ordered step list bound to one instance.
#[derive(Debug, Clone)]
pub struct InstancePipeline {
    subject: PipelineSubject,
    steps: Vec<EvalStep>,
}

/// Write-once value holder.
#[derive(Debug)]
pub(crate) struct SlotValue<T> {
    slot: Slot,
    value: Option<T>,
}

/// Scratch record threading step outputs to later steps of one run.
#[derive(Debug)]
pub struct PipelineContext {
    pub(crate) provider: SlotValue<Arc<dyn ResourceProvider>>,
    pub(crate) config: SlotValue<ResolvedConfig>,
    pub(crate) prior_state: SlotValue<Option<InstanceState>>,
    pub(crate) diff: SlotValue<Option<InstanceDiff>>,
    pub(crate) planned_state: SlotValue<Option<InstanceState>>,
    pub(crate) applied_state: SlotValue<Option<InstanceState>>,
}

impl<T> SlotValue<T> {
    const fn new(slot: Slot) -> Self {
        Self { slot, value: None }
    }

    /// Stores the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot was already written.
    pub(crate) fn set(&mut self, value: T) -> Result<()> {
        if self.value.is_some() {
            return Err(InfraplanError::internal(format!(
                "pipeline slot {:?} written twice",
                self.slot
            )));
        }
        self.value = Some(value);
        Ok(())
    }

    /// Reads the value.
    ///
    /// # Errors
    ///
    /// Returns an error if no earlier step wrote the slot.
    pub(crate) fn get(&self) -> Result<&T> {
        self.value.as_ref().ok_or_else(|| {
            InfraplanError::internal(format!("pipeline slot {:?} read before written", self.slot))
        })
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            provider: SlotValue::new(Slot::Provider),
            config: SlotValue::new(Slot::Config),
            prior_state: SlotValue::new(Slot::PriorState),
            diff: SlotValue::new(Slot::Diff),
            planned_state: SlotValue::new(Slot::PlannedState),
            applied_state: SlotValue::new(Slot::AppliedState),
        }
    }
}

impl EvalStep {
    /// Slots this step reads.
    #[must_use]
    pub fn inputs(self) -> &'static [Slot] {
        match self {
            Self::SkipPlaceholder
            | Self::WriteState(StateSource::Nil)
            | Self::Interpolate
            | Self::GetProvider
            | Self::ReadState
            | Self::RemoveState => &[],
            Self::WriteState(StateSource::Prior) | Self::DiffDestroy => &[Slot::PriorState],
            Self::WriteState(StateSource::Planned) => &[Slot::PlannedState],
            Self::WriteState(StateSource::Applied) => &[Slot::AppliedState],
            Self::ValidateResource | Self::ReadDataDiff => &[Slot::Provider, Slot::Config],
            Self::DeferIfUnknownWithPriorState | Self::SkipIfAlreadyRead => {
                &[Slot::Config, Slot::PriorState]
            }
            Self::Diff => &[Slot::Provider, Slot::Config, Slot::PriorState],
            Self::CheckPreventDestroy | Self::WriteDiff => &[Slot::Diff],
            Self::DeferIfUnresolved => &[Slot::Config],
            Self::ReadDataApply => &[Slot::Provider, Slot::Diff],
        }
    }

    /// Slots this step writes.
    #[must_use]
    pub fn outputs(self) -> &'static [Slot] {
        match self {
            Self::Interpolate => &[Slot::Config],
            Self::GetProvider => &[Slot::Provider],
            Self::ReadState => &[Slot::PriorState],
            Self::Diff | Self::ReadDataDiff => &[Slot::Diff, Slot::PlannedState],
            Self::ReadDataApply => &[Slot::AppliedState],
            Self::DiffDestroy => &[Slot::Diff],
            Self::SkipPlaceholder
            | Self::WriteState(_)
            | Self::ValidateResource
            | Self::DeferIfUnknownWithPriorState
            | Self::CheckPreventDestroy
            | Self::WriteDiff
            | Self::DeferIfUnresolved
            | Self::SkipIfAlreadyRead
            | Self::RemoveState => &[],
        }
    }

    /// Short name used in logs and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SkipPlaceholder => "skip_placeholder",
            Self::WriteState(StateSource::Nil) => "write_state(nil)",
            Self::WriteState(StateSource::Prior) => "write_state(prior)",
            Self::WriteState(StateSource::Planned) => "write_state(planned)",
            Self::WriteState(StateSource::Applied) => "write_state(applied)",
            Self::Interpolate => "interpolate",
            Self::GetProvider => "get_provider",
            Self::ValidateResource => "validate_resource",
            Self::ReadState => "read_state",
            Self::DeferIfUnknownWithPriorState => "defer_if_unknown_with_prior_state",
            Self::Diff => "diff",
            Self::CheckPreventDestroy => "check_prevent_destroy",
            Self::WriteDiff => "write_diff",
            Self::DeferIfUnresolved => "defer_if_unresolved",
            Self::ReadDataDiff => "read_data_diff",
            Self::ReadDataApply => "read_data_apply",
            Self::SkipIfAlreadyRead => "skip_if_already_read",
            Self::DiffDestroy => "diff_destroy",
            Self::RemoveState => "remove_state",
        }
    }
}

impl PipelineSubject {
    /// Builds the subject for a live instance.
    #[must_use]
    pub fn from_instance(node: &InstanceNode) -> Self {
        Self {
            address: node.address.clone(),
            config: Some(Arc::clone(&node.config)),
            provider: node.provider.clone(),
            dependencies: node.config.references(),
            placeholder: node.placeholder,
        }
    }

    /// Builds the subject for an orphan.
    #[must_use]
    pub fn from_orphan(node: &OrphanNode) -> Self {
        Self {
            address: node.address.clone(),
            config: node.config.clone(),
            provider: node.provider.clone(),
            dependencies: node
                .state
                .as_ref()
                .map(|rs| rs.dependencies.clone())
                .unwrap_or_default(),
            placeholder: false,
        }
    }
}

impl InstancePipeline {
    /// Plans a managed instance.
    #[must_use]
    pub fn managed(subject: PipelineSubject) -> Self {
        Self {
            subject,
            steps: vec![
                EvalStep::Interpolate,
                EvalStep::GetProvider,
                EvalStep::ValidateResource,
                EvalStep::ReadState,
                EvalStep::DeferIfUnknownWithPriorState,
                EvalStep::Diff,
                EvalStep::CheckPreventDestroy,
                EvalStep::WriteState(StateSource::Planned),
                EvalStep::WriteDiff,
            ],
        }
    }

    /// Reads a data source during refresh.
    ///
    /// Any previous read is cleared first so it cannot leak into
    /// resolution if the read has to be deferred.
    #[must_use]
    pub fn data_refresh(subject: PipelineSubject) -> Self {
        Self {
            subject,
            steps: vec![
                EvalStep::SkipPlaceholder,
                EvalStep::WriteState(StateSource::Nil),
                EvalStep::Interpolate,
                EvalStep::DeferIfUnresolved,
                EvalStep::GetProvider,
                EvalStep::ReadDataDiff,
                EvalStep::ReadDataApply,
                EvalStep::WriteState(StateSource::Applied),
            ],
        }
    }

    /// Plans a data source that could not be read during refresh.
    #[must_use]
    pub fn data_plan(subject: PipelineSubject) -> Self {
        Self {
            subject,
            steps: vec![
                EvalStep::ReadState,
                EvalStep::Interpolate,
                EvalStep::GetProvider,
                EvalStep::ReadDataDiff,
                EvalStep::SkipIfAlreadyRead,
                EvalStep::WriteState(StateSource::Planned),
                EvalStep::WriteDiff,
            ],
        }
    }

    /// Plans the destruction of a managed orphan.
    #[must_use]
    pub fn managed_orphan(subject: PipelineSubject) -> Self {
        Self {
            subject,
            steps: vec![
                EvalStep::ReadState,
                EvalStep::DiffDestroy,
                EvalStep::CheckPreventDestroy,
                EvalStep::WriteDiff,
            ],
        }
    }

    /// Forgets a data-source orphan.
    #[must_use]
    pub fn data_orphan(subject: PipelineSubject) -> Self {
        Self {
            subject,
            steps: vec![EvalStep::RemoveState],
        }
    }

    /// Selects the pipeline for a live instance; `None` when the instance
    /// has nothing to do in this phase.
    #[must_use]
    pub fn for_instance(node: &InstanceNode, operation: WalkOperation) -> Option<Self> {
        let subject = PipelineSubject::from_instance(node);
        match (node.address.mode, operation) {
            (ResourceMode::Managed, WalkOperation::Plan) => Some(Self::managed(subject)),
            (ResourceMode::Managed, WalkOperation::Refresh) => None,
            (ResourceMode::Data, WalkOperation::Refresh) => Some(Self::data_refresh(subject)),
            (ResourceMode::Data, WalkOperation::Plan) => Some(Self::data_plan(subject)),
        }
    }

    /// Selects the pipeline for an orphan.
    #[must_use]
    pub fn for_orphan(node: &OrphanNode, operation: WalkOperation) -> Option<Self> {
        let subject = PipelineSubject::from_orphan(node);
        match (node.address.mode, operation) {
            (ResourceMode::Managed, WalkOperation::Plan) => Some(Self::managed_orphan(subject)),
            (ResourceMode::Managed, WalkOperation::Refresh) => None,
            (ResourceMode::Data, _) => Some(Self::data_orphan(subject)),
        }
    }

    /// Returns the instance this pipeline evaluates.
    #[must_use]
    pub const fn subject(&self) -> &PipelineSubject {
        &self.subject
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[EvalStep] {
        &self.steps
    }

    /// Checks that every step reads only slots written by an earlier step
    /// and that no slot is written twice.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending step.
    pub fn check_dataflow(&self) -> Result<()> {
        let mut written: HashSet<Slot> = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(missing) = step.inputs().iter().find(|s| !written.contains(*s)) {
                return Err(InfraplanError::internal(format!(
                    "step {i} ({}) reads {missing:?} before any step writes it",
                    step.name()
                )));
            }
            for slot in step.outputs() {
                if !written.insert(*slot) {
                    return Err(InfraplanError::internal(format!(
                        "step {i} ({}) writes {slot:?} a second time",
                        step.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Runs every step in order until one stops or fails.
    pub async fn run(&self, ctx: &EvalContext) -> PipelineReport {
        let address = self.subject.address.to_string();
        let mut diagnostics = Diagnostics::new();
        let mut steps_run = Vec::with_capacity(self.steps.len());

        if let Err(err) = self.check_dataflow() {
            error!(address = %address, "Rejected pipeline: {err}");
            diagnostics.append(err);
            return PipelineReport {
                outcome: PipelineOutcome::Failed,
                diagnostics,
                steps_run,
            };
        }

        let mut pctx = PipelineContext::default();
        for step in &self.steps {
            debug!(address = %address, step = step.name(), "Running step");
            steps_run.push(step.name());

            match step.execute(&self.subject, ctx, &mut pctx, &mut diagnostics).await {
                StepOutcome::Continue => {}
                StepOutcome::StopSuccessfully => {
                    info!(address = %address, step = step.name(), "Deferred");
                    return PipelineReport {
                        outcome: PipelineOutcome::Deferred,
                        diagnostics,
                        steps_run,
                    };
                }
                StepOutcome::Fail(err) => {
                    error!(address = %address, step = step.name(), "Failed: {err}");
                    diagnostics.append(err);
                    return PipelineReport {
                        outcome: PipelineOutcome::Failed,
                        diagnostics,
                        steps_run,
                    };
                }
            }
        }

        debug!(address = %address, "Pipeline completed");
        PipelineReport {
            outcome: PipelineOutcome::Completed,
            diagnostics,
            steps_run,
        }
    }
}

impl PipelineReport {
    /// Returns true if `step` ran.
    #[must_use]
    pub fn ran(&self, step: EvalStep) -> bool {
        self.steps_run.contains(&step.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, StateKey};
    use crate::config::ConfigHasher;
    use crate::planner::diff::DiffType;
    use crate::state::{ResourceState, State, UNKNOWN_VALUE};
    use crate::testing::{ProviderCall, SpyProvider, eval_context};
    use serde_json::json;

    fn subject(config: ResourceConfig) -> PipelineSubject {
        let address = config.address(&ModulePath::root());
        PipelineSubject {
            provider: config.provider_name(),
            dependencies: config.references(),
            address,
            config: Some(Arc::new(config)),
            placeholder: false,
        }
    }

    fn web() -> ResourceConfig {
        ResourceConfig::managed("aws_instance", "web").with_attr("ami", json!("ami-1"))
    }

    fn state_with(key: &str, instance: Option<InstanceState>) -> State {
        let mut state = State::new();
        state.set(
            &ModulePath::root(),
            StateKey::from_raw(key),
            ResourceState {
                resource_type: String::from("aws_instance"),
                provider: String::from("aws"),
                dependencies: Vec::new(),
                primary: instance,
            },
        );
        state
    }

    fn diff_of(ctx: &EvalContext, key: &str) -> Option<InstanceDiff> {
        ctx.diff
            .read()
            .get(&ModulePath::root(), &StateKey::from_raw(key))
            .cloned()
    }

    fn instance_of(ctx: &EvalContext, key: &str) -> Option<InstanceState> {
        ctx.state
            .read()
            .instance(&ModulePath::root(), &StateKey::from_raw(key))
            .cloned()
    }

    #[test]
    fn test_builtin_pipelines_pass_dataflow_check() {
        let s = subject(web());
        for pipeline in [
            InstancePipeline::managed(s.clone()),
            InstancePipeline::data_refresh(s.clone()),
            InstancePipeline::data_plan(s.clone()),
            InstancePipeline::managed_orphan(s.clone()),
            InstancePipeline::data_orphan(s),
        ] {
            assert!(pipeline.check_dataflow().is_ok(), "{:?}", pipeline.steps());
        }
    }

    #[test]
    fn test_dataflow_rejects_read_before_write() {
        let pipeline = InstancePipeline {
            subject: subject(web()),
            steps: vec![EvalStep::Diff, EvalStep::Interpolate],
        };
        let err = pipeline.check_dataflow().unwrap_err();
        assert!(err.to_string().contains("diff"));
    }

    #[test]
    fn test_dataflow_rejects_double_write() {
        let pipeline = InstancePipeline {
            subject: subject(web()),
            steps: vec![EvalStep::Interpolate, EvalStep::Interpolate],
        };
        assert!(pipeline.check_dataflow().is_err());
    }

    #[test]
    fn test_slot_is_write_once() {
        let mut slot = SlotValue::new(Slot::Diff);
        assert!(slot.get().is_err());
        slot.set(1).unwrap();
        assert!(slot.set(2).is_err());
        assert_eq!(*slot.get().unwrap(), 1);
    }

    #[test]
    fn test_pipeline_selection() {
        let managed = InstanceNode {
            address: ResourceAddress::managed("aws_instance", "web"),
            config: Arc::new(web()),
            provider: String::from("aws"),
            state: None,
            placeholder: false,
        };
        assert!(InstancePipeline::for_instance(&managed, WalkOperation::Refresh).is_none());
        let plan = InstancePipeline::for_instance(&managed, WalkOperation::Plan).unwrap();
        assert_eq!(plan.steps()[0], EvalStep::Interpolate);

        let data = InstanceNode {
            address: ResourceAddress::data("aws_ami", "ubuntu"),
            config: Arc::new(ResourceConfig::data("aws_ami", "ubuntu")),
            ..managed
        };
        let refresh = InstancePipeline::for_instance(&data, WalkOperation::Refresh).unwrap();
        assert_eq!(refresh.steps()[0], EvalStep::SkipPlaceholder);
        assert_eq!(refresh.steps()[1], EvalStep::WriteState(StateSource::Nil));
        let plan = InstancePipeline::for_instance(&data, WalkOperation::Plan).unwrap();
        assert_eq!(plan.steps()[0], EvalStep::ReadState);

        let orphan = OrphanNode {
            address: ResourceAddress::managed("aws_instance", "old"),
            config: None,
            provider: String::from("aws"),
            state: None,
        };
        assert!(InstancePipeline::for_orphan(&orphan, WalkOperation::Refresh).is_none());
        assert_eq!(
            InstancePipeline::for_orphan(&orphan, WalkOperation::Plan)
                .unwrap()
                .steps(),
            &[
                EvalStep::ReadState,
                EvalStep::DiffDestroy,
                EvalStep::CheckPreventDestroy,
                EvalStep::WriteDiff,
            ]
        );
    }

    #[tokio::test]
    async fn test_managed_create() {
        let spy = Arc::new(SpyProvider::new());
        let ctx = eval_context(State::new(), Arc::clone(&spy));
        let report = InstancePipeline::managed(subject(web())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);

        let diff = diff_of(&ctx, "aws_instance.web").unwrap();
        assert_eq!(diff.change_type(), DiffType::Create);
        assert_eq!(diff.attributes["ami"].new, "ami-1");
        assert!(diff.attributes["id"].new_computed);
        assert!(diff.wholly_known);

        let planned = instance_of(&ctx, "aws_instance.web").unwrap();
        assert_eq!(planned.attributes["ami"], "ami-1");
        assert_eq!(planned.attributes["id"], UNKNOWN_VALUE);
        assert_eq!(
            spy.calls(),
            vec![
                ProviderCall::Validate(String::from("aws_instance")),
                ProviderCall::Diff(String::from("aws_instance.web")),
            ]
        );
    }

    #[tokio::test]
    async fn test_managed_rerun_is_byte_identical() {
        let prior = InstanceState::new("i-1").with_attr("ami", "ami-1");
        let ctx = eval_context(
            state_with("aws_instance.web", Some(prior.clone())),
            Arc::new(SpyProvider::new()),
        );
        let pipeline = InstancePipeline::managed(subject(web()));
        let hasher = ConfigHasher::new();

        pipeline.run(&ctx).await;
        let first_state = serde_json::to_string(&*ctx.state.read()).unwrap();
        let first_diff = hasher.hash_plan(&ctx.diff.read());
        pipeline.run(&ctx).await;
        assert_eq!(serde_json::to_string(&*ctx.state.read()).unwrap(), first_state);
        assert_eq!(hasher.hash_plan(&ctx.diff.read()), first_diff);
        assert_eq!(
            instance_of(&ctx, "aws_instance.web").map(|s| hasher.hash_instance_state(&s)),
            Some(hasher.hash_instance_state(&prior))
        );

        assert!(diff_of(&ctx, "aws_instance.web").is_none());
        assert_eq!(instance_of(&ctx, "aws_instance.web"), Some(prior));
    }

    #[tokio::test]
    async fn test_unknown_config_with_prior_state_defers() {
        let spy = Arc::new(SpyProvider::new());
        let prior = InstanceState::new("i-1").with_attr("subnet", "s-1");
        let ctx = eval_context(
            state_with("aws_instance.web", Some(prior.clone())),
            Arc::clone(&spy),
        );
        let config = ResourceConfig::managed("aws_instance", "web")
            .with_attr("subnet", json!("${aws_subnet.main.id}"))
            .with_prevent_destroy();

        let report = InstancePipeline::managed(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Deferred);
        assert!(!report.diagnostics.has_errors());
        assert!(!report.ran(EvalStep::Diff));
        assert!(!report.ran(EvalStep::CheckPreventDestroy));
        assert!(spy.diff_calls().is_empty());
        assert!(diff_of(&ctx, "aws_instance.web").is_none());
        assert_eq!(instance_of(&ctx, "aws_instance.web"), Some(prior));
    }

    #[tokio::test]
    async fn test_unknown_config_without_prior_state_is_diffed() {
        let ctx = eval_context(State::new(), Arc::new(SpyProvider::new()));
        let config = ResourceConfig::managed("aws_instance", "web")
            .with_attr("subnet", json!("${aws_subnet.main.id}"));

        let report = InstancePipeline::managed(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        let diff = diff_of(&ctx, "aws_instance.web").unwrap();
        assert!(diff.attributes["subnet"].new_computed);
        assert!(!diff.wholly_known);
    }

    #[tokio::test]
    async fn test_prevent_destroy_blocks_replacement() {
        let spy = Arc::new(SpyProvider::new().with_force_new("ami"));
        let prior = InstanceState::new("i-1").with_attr("ami", "ami-0");
        let state = state_with("aws_instance.web", Some(prior.clone()));
        let ctx = eval_context(state, spy);

        let report = InstancePipeline::managed(subject(web().with_prevent_destroy()))
            .run(&ctx)
            .await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        assert_eq!(report.steps_run.last(), Some(&"check_prevent_destroy"));
        let error = report.diagnostics.errors().next().unwrap();
        assert!(error.summary.contains("aws_instance.web"));
        assert!(error.summary.contains("prevent_destroy"));
        assert!(diff_of(&ctx, "aws_instance.web").is_none());
        assert_eq!(instance_of(&ctx, "aws_instance.web"), Some(prior));
    }

    #[tokio::test]
    async fn test_requires_new_without_guard_replaces() {
        let spy = Arc::new(SpyProvider::new().with_force_new("ami"));
        let prior = InstanceState::new("i-1").with_attr("ami", "ami-0");
        let ctx = eval_context(state_with("aws_instance.web", Some(prior)), spy);

        let report = InstancePipeline::managed(subject(web())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        let diff = diff_of(&ctx, "aws_instance.web").unwrap();
        assert!(diff.destroy);
        assert_eq!(diff.attributes["id"].old, "i-1");
        assert_eq!(diff.change_type(), DiffType::Replace);
    }

    #[tokio::test]
    async fn test_tainted_instance_is_replaced() {
        let prior = InstanceState::new("i-1").with_attr("ami", "ami-1").tainted();
        let ctx = eval_context(
            state_with("aws_instance.web", Some(prior)),
            Arc::new(SpyProvider::new()),
        );
        InstancePipeline::managed(subject(web())).run(&ctx).await;
        let diff = diff_of(&ctx, "aws_instance.web").unwrap();
        assert!(diff.destroy_tainted);
        assert_eq!(diff.change_type(), DiffType::Replace);
    }

    #[tokio::test]
    async fn test_placeholder_is_never_wholly_known() {
        let ctx = eval_context(State::new(), Arc::new(SpyProvider::new()));
        let mut s = subject(web().with_count("${var.n}"));
        s.address = s.address.instance(0);
        s.placeholder = true;
        InstancePipeline::managed(s).run(&ctx).await;
        assert!(!diff_of(&ctx, "aws_instance.web.0").unwrap().wholly_known);
    }

    #[tokio::test]
    async fn test_provider_errors_fail_the_node() {
        let ctx = eval_context(
            State::new(),
            Arc::new(SpyProvider::new().with_diff_error("boom")),
        );
        let report = InstancePipeline::managed(subject(web())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        let summary = &report.diagnostics.errors().next().unwrap().summary;
        assert!(summary.contains("aws_instance.web"));
        assert!(summary.contains("boom"));
        assert!(instance_of(&ctx, "aws_instance.web").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_provider() {
        let ctx = eval_context(State::new(), Arc::new(SpyProvider::new()));
        let config = ResourceConfig::managed("gcp_instance", "web");
        let report = InstancePipeline::managed(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        assert!(report.diagnostics.errors().next().unwrap().summary.contains("gcp"));
    }

    #[tokio::test]
    async fn test_validation() {
        let ctx = eval_context(
            State::new(),
            Arc::new(SpyProvider::new().with_validation_warning("deprecated")),
        );
        let report = InstancePipeline::managed(subject(web())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        assert!(report.diagnostics.is_empty());

        let ctx = eval_context(
            State::new(),
            Arc::new(SpyProvider::new().with_validation_error("bad ami")),
        );
        let report = InstancePipeline::managed(subject(web())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        assert!(!report.ran(EvalStep::ReadState));
    }

    #[tokio::test]
    async fn test_interpolation_error() {
        let ctx = eval_context(State::new(), Arc::new(SpyProvider::new()));
        let config = ResourceConfig::managed("aws_instance", "web").with_attr("ami", json!("${var.nope}"));
        let report = InstancePipeline::managed(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        assert_eq!(report.steps_run, vec!["interpolate"]);
        assert!(report.diagnostics.errors().next().unwrap().summary.contains("nope"));
    }

    fn ubuntu() -> ResourceConfig {
        ResourceConfig::data("aws_ami", "ubuntu").with_attr("name", json!("ubuntu-22.04"))
    }

    #[tokio::test]
    async fn test_data_refresh_reads() {
        let spy = Arc::new(SpyProvider::new().with_data_attr("image_id", "ami-42"));
        let ctx = eval_context(State::new(), Arc::clone(&spy));
        let report = InstancePipeline::data_refresh(subject(ubuntu())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);

        let read = instance_of(&ctx, "data.aws_ami.ubuntu").unwrap();
        assert_eq!(read.id, "data.aws_ami.ubuntu-read");
        assert_eq!(read.attributes["image_id"], "ami-42");
        assert_eq!(
            spy.calls(),
            vec![
                ProviderCall::ReadDataDiff(String::from("data.aws_ami.ubuntu")),
                ProviderCall::ReadDataApply(String::from("data.aws_ami.ubuntu")),
            ]
        );
        assert!(ctx.diff.read().is_empty());
    }

    #[tokio::test]
    async fn test_data_refresh_leaves_placeholder_untouched() {
        let spy = Arc::new(SpyProvider::new());
        let mut state = State::new();
        state.set(
            &ModulePath::root(),
            StateKey::from_raw("data.aws_ami.ubuntu.0"),
            ResourceState {
                resource_type: String::from("aws_ami"),
                provider: String::from("aws"),
                dependencies: Vec::new(),
                primary: Some(InstanceState::new("ami-old")),
            },
        );
        let ctx = eval_context(state, Arc::clone(&spy));
        let mut placeholder = subject(ubuntu().with_count("${var.n}"));
        placeholder.address = placeholder.address.instance(0);
        placeholder.placeholder = true;

        let report = InstancePipeline::data_refresh(placeholder).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Deferred);
        assert_eq!(report.steps_run, vec!["skip_placeholder"]);
        assert!(spy.calls().is_empty());
        assert_eq!(
            instance_of(&ctx, "data.aws_ami.ubuntu.0").map(|s| s.id),
            Some(String::from("ami-old"))
        );
    }

    #[tokio::test]
    async fn test_data_refresh_defers_on_depends_on() {
        let spy = Arc::new(SpyProvider::new());
        let mut state = State::new();
        state.set(
            &ModulePath::root(),
            StateKey::from_raw("data.aws_ami.ubuntu"),
            ResourceState {
                resource_type: String::from("aws_ami"),
                provider: String::from("aws"),
                dependencies: Vec::new(),
                primary: Some(InstanceState::new("stale")),
            },
        );
        let ctx = eval_context(state, Arc::clone(&spy));
        let config = ubuntu().with_depends_on("aws_instance.web");

        let report = InstancePipeline::data_refresh(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Deferred);
        assert!(spy.calls().is_empty());
        // stale read cleared, entry kept
        let root = ModulePath::root();
        let key = StateKey::from_raw("data.aws_ami.ubuntu");
        assert!(ctx.state.read().get(&root, &key).is_some());
        assert!(instance_of(&ctx, "data.aws_ami.ubuntu").is_none());
    }

    #[tokio::test]
    async fn test_data_plan_after_deferred_refresh() {
        let spy = Arc::new(SpyProvider::new());
        let ctx = eval_context(State::new(), Arc::clone(&spy));
        let config = ubuntu().with_attr("owner", json!("${aws_instance.web.owner_id}"));

        let refresh = InstancePipeline::data_refresh(subject(config.clone())).run(&ctx).await;
        assert_eq!(refresh.outcome, PipelineOutcome::Deferred);

        let report = InstancePipeline::data_plan(subject(config)).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        let diff = diff_of(&ctx, "data.aws_ami.ubuntu").unwrap();
        assert!(diff.attributes["id"].new_computed);
        assert!(!diff.wholly_known);
        assert_eq!(diff.change_type(), DiffType::Create);
    }

    #[tokio::test]
    async fn test_data_plan_skips_already_read() {
        let spy = Arc::new(SpyProvider::new());
        let ctx = eval_context(State::new(), Arc::clone(&spy));

        InstancePipeline::data_refresh(subject(ubuntu())).run(&ctx).await;
        let read = instance_of(&ctx, "data.aws_ami.ubuntu");
        let report = InstancePipeline::data_plan(subject(ubuntu())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Deferred);
        assert!(ctx.diff.read().is_empty());
        assert_eq!(instance_of(&ctx, "data.aws_ami.ubuntu"), read);
    }

    #[tokio::test]
    async fn test_managed_orphan_destroy() {
        let ctx = eval_context(
            state_with("aws_instance.web.3", Some(InstanceState::new("i-3"))),
            Arc::new(SpyProvider::new()),
        );
        let mut s = subject(web());
        s.address = s.address.instance(3);
        let report = InstancePipeline::managed_orphan(s.clone()).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        assert_eq!(
            diff_of(&ctx, "aws_instance.web.3").unwrap().change_type(),
            DiffType::Destroy
        );

        s.config = Some(Arc::new(web().with_prevent_destroy()));
        let ctx = eval_context(
            state_with("aws_instance.web.3", Some(InstanceState::new("i-3"))),
            Arc::new(SpyProvider::new()),
        );
        let report = InstancePipeline::managed_orphan(s).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Failed);
        assert!(diff_of(&ctx, "aws_instance.web.3").is_none());
    }

    #[tokio::test]
    async fn test_orphan_without_remote_object() {
        let ctx = eval_context(
            state_with("aws_instance.web", Some(InstanceState::new(""))),
            Arc::new(SpyProvider::new()),
        );
        let mut s = subject(web());
        s.config = None;
        let report = InstancePipeline::managed_orphan(s).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        assert!(ctx.diff.read().is_empty());
    }

    #[tokio::test]
    async fn test_data_orphan_forgets_state() {
        let mut state = State::new();
        state.set(
            &ModulePath::root(),
            StateKey::from_raw("data.aws_ami.ubuntu"),
            ResourceState::default(),
        );
        let ctx = eval_context(state, Arc::new(SpyProvider::new()));
        let report = InstancePipeline::data_orphan(subject(ubuntu())).run(&ctx).await;
        assert_eq!(report.outcome, PipelineOutcome::Completed);
        assert!(ctx.state.read().is_empty());
    }
}
