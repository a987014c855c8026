//! Planning runs.
//!
//! A [`Planner`] takes a declarative configuration and the recorded state
//! and produces a [`Plan`]. It holds the state lock for the whole run,
//! optionally refreshes data sources first, and never writes the planned
//! state back.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::addrs::ResourceAddress;
use crate::config::{Config, ConfigValidator, PlannerSettings};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::Result;
use crate::eval::{CountEvaluator, EvalContext, Interpolator, StateResolver, WalkOperation};
use crate::graph::PlanGraphBuilder;
use crate::provider::ProviderRegistry;
use crate::state::{SharedState, State, StateStore, generate_holder_id};

use super::diff::PlanDiff;
use super::plan::Plan;
use super::walker::{GraphWalker, WalkReport};

/// Name recorded in the state lock while planning.
const LOCK_OPERATION: &str = "plan";

/// Runs plans against one state store.
pub struct Planner<'a, S: StateStore> {
    /// Run settings.
    settings: &'a PlannerSettings,
    /// State store.
    state_store: &'a S,
    /// Registered providers.
    providers: Arc<ProviderRegistry>,
    /// Configuration resolver.
    interpolator: Arc<dyn Interpolator>,
    /// Count expression evaluator.
    count_evaluator: Arc<dyn CountEvaluator>,
    /// Configuration validator.
    validator: ConfigValidator,
}

/// Result of a planning run.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    /// The computed plan.
    pub plan: Plan,
    /// Report of the refresh walk, if one ran.
    pub refresh: Option<WalkReport>,
    /// Report of the plan walk.
    pub walk: WalkReport,
    /// Everything reported during the run, validation warnings included.
    pub diagnostics: Diagnostics,
    /// Whether the refreshed state was written back.
    pub state_persisted: bool,
    /// State as it would look after apply; never persisted.
    #[serde(skip)]
    pub planned_state: State,
}

impl PlanReport {
    /// Returns true if any step of the run reported an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

impl<'a, S: StateStore> Planner<'a, S> {
    /// Creates a planner resolving configuration and counts from state.
    #[must_use]
    pub fn new(
        settings: &'a PlannerSettings,
        state_store: &'a S,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        let resolver = Arc::new(StateResolver::new());
        Self {
            settings,
            state_store,
            providers,
            interpolator: Arc::clone(&resolver) as Arc<dyn Interpolator>,
            count_evaluator: resolver,
            validator: ConfigValidator::new(),
        }
    }

    /// Replaces the configuration resolver.
    #[must_use]
    pub fn with_interpolator(mut self, interpolator: Arc<dyn Interpolator>) -> Self {
        self.interpolator = interpolator;
        self
    }

    /// Replaces the count evaluator.
    #[must_use]
    pub fn with_count_evaluator(mut self, count_evaluator: Arc<dyn CountEvaluator>) -> Self {
        self.count_evaluator = count_evaluator;
        self
    }

    /// Plans `config` against the recorded state.
    ///
    /// Node failures do not fail the run; they are reported in the returned
    /// diagnostics and the affected instances are left out of the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a target cannot be
    /// parsed, the state lock cannot be taken, or state cannot be read or
    /// written.
    pub async fn plan(&self, config: &Config) -> Result<PlanReport> {
        info!(
            resources = config.resource_count(),
            backend = self.state_store.backend_type(),
            "Starting plan"
        );

        let validation = self.validator.validate(config)?;
        let mut diagnostics = Diagnostics::new();
        for warning in validation.warnings {
            warn!("{warning}");
            diagnostics.append(Diagnostic::warning(warning));
        }

        let targets = self.settings.target_addresses()?;
        if !targets.is_empty() {
            info!(targets = targets.len(), "Planning with targets");
        }

        let holder = generate_holder_id();
        let lock = self
            .state_store
            .acquire_lock(&holder, LOCK_OPERATION)
            .await?;
        debug!(lock_id = %lock.lock_id, "Acquired state lock");

        let result = self.plan_locked(config, &targets, diagnostics).await;

        match self.state_store.release_lock(&lock.lock_id).await {
            Ok(()) => debug!(lock_id = %lock.lock_id, "Released state lock"),
            Err(err) if result.is_ok() => return Err(err),
            Err(err) => error!("Failed to release state lock: {err}"),
        }

        let report = result?;
        if report.has_errors() {
            error!(
                errors = report.diagnostics.errors().count(),
                "Plan finished with errors"
            );
        } else {
            info!("{}", report.plan.summary());
        }
        Ok(report)
    }

    async fn plan_locked(
        &self,
        config: &Config,
        targets: &[ResourceAddress],
        mut diagnostics: Diagnostics,
    ) -> Result<PlanReport> {
        let mut state = self.state_store.load().await?.unwrap_or_default();
        debug!(
            serial = state.serial,
            resources = state.resource_count(),
            "Loaded state"
        );

        let graph = PlanGraphBuilder::new(config, &state, targets).build()?;
        let parallelism = self.settings.effective_parallelism();

        let mut refresh = None;
        let mut state_persisted = false;
        if self.settings.refresh {
            let shared = state.into_shared();
            let ctx = self
                .context(Arc::clone(&shared))
                .with_operation(WalkOperation::Refresh);
            let report = GraphWalker::new(ctx, parallelism).walk(&graph).await;
            state = shared.read().clone();

            if report.has_errors() {
                warn!("Refresh reported errors; state not saved");
            } else {
                state.serial += 1;
                state.prune();
                self.state_store.save(&state).await?;
                state_persisted = true;
            }
            diagnostics.extend(report.diagnostics.clone());
            refresh = Some(report);
        }

        let planned = state.into_shared();
        let walker = GraphWalker::new(self.context(Arc::clone(&planned)), parallelism);
        let walk = walker.walk(&graph).await;
        diagnostics.extend(walk.diagnostics.clone());

        let plan = Plan::from_diff(&walker.context().diff.read());
        let planned_state = planned.read().clone();

        Ok(PlanReport {
            plan,
            refresh,
            walk,
            diagnostics,
            state_persisted,
            planned_state,
        })
    }

    fn context(&self, state: SharedState) -> EvalContext {
        EvalContext::new(
            state,
            PlanDiff::new().into_shared(),
            Arc::clone(&self.providers),
            Arc::clone(&self.interpolator),
            Arc::clone(&self.count_evaluator),
        )
    }
}
