//! Execution of individual pipeline steps.
//!
//! Steps never hold a state or diff lock across a provider call: every
//! lock is taken inside a block that copies out what it needs.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::diagnostics::Diagnostics;
use crate::error::{ConfigError, InfraplanError, ProviderError, Result};
use crate::planner::diff::{AttributeDiff, InstanceDiff};
use crate::provider::InstanceInfo;
use crate::state::{InstanceState, ResourceState};

use super::context::EvalContext;
use super::interpolate::InstanceScope;
use super::pipeline::{EvalStep, PipelineContext, PipelineSubject, StateSource, StepOutcome};

/// Joins the summaries of every error in `diags`.
fn error_summary(diags: &Diagnostics) -> String {
    diags
        .errors()
        .map(|d| d.summary.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Keeps only the warnings of `diags`.
fn warnings_of(diags: &Diagnostics) -> Diagnostics {
    let mut out = Diagnostics::new();
    for warning in diags.warnings() {
        out.append(warning.clone());
    }
    out
}

fn write_state(ctx: &EvalContext, subject: &PipelineSubject, primary: Option<InstanceState>) {
    let address = &subject.address;
    let resource = ResourceState {
        resource_type: address.resource_type.clone(),
        provider: subject.provider.clone(),
        dependencies: subject.dependencies.clone(),
        primary,
    };
    ctx.state
        .write()
        .set(&address.module, address.state_key(), resource);
}

fn write_diff(ctx: &EvalContext, subject: &PipelineSubject, diff: Option<InstanceDiff>) {
    let address = &subject.address;
    ctx.diff
        .write()
        .set(&address.module, address.state_key(), diff);
}

impl EvalStep {
    /// Runs the step, folding errors into [`StepOutcome::Fail`].
    pub(crate) async fn execute(
        self,
        subject: &PipelineSubject,
        ctx: &EvalContext,
        pctx: &mut PipelineContext,
        diags: &mut Diagnostics,
    ) -> StepOutcome {
        match self.run(subject, ctx, pctx, diags).await {
            Ok(outcome) => outcome,
            Err(err) => StepOutcome::Fail(err),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        self,
        subject: &PipelineSubject,
        ctx: &EvalContext,
        pctx: &mut PipelineContext,
        diags: &mut Diagnostics,
    ) -> Result<StepOutcome> {
        let address = &subject.address;
        let addr = address.to_string();

        match self {
            Self::SkipPlaceholder => {
                if subject.placeholder {
                    debug!(address = %addr, "Count not known yet, leaving state untouched");
                    return Ok(StepOutcome::StopSuccessfully);
                }
            }

            Self::WriteState(source) => {
                let snapshot = match source {
                    StateSource::Nil => None,
                    StateSource::Prior => pctx.prior_state.get()?.clone(),
                    StateSource::Planned => pctx.planned_state.get()?.clone(),
                    StateSource::Applied => pctx.applied_state.get()?.clone(),
                };
                write_state(ctx, subject, snapshot);
            }

            Self::Interpolate => {
                let config = subject.config.as_ref().ok_or_else(|| ConfigError::MissingConfig {
                    address: addr.clone(),
                })?;
                let (resolved, resolve_diags) = {
                    let state = ctx.state.read();
                    let scope = InstanceScope::new(address, &state);
                    ctx.interpolator.resolve(&config.config, &scope)
                };
                if resolve_diags.has_errors() {
                    diags.extend(warnings_of(&resolve_diags));
                    return Err(ConfigError::interpolation(addr, error_summary(&resolve_diags)).into());
                }
                diags.extend(resolve_diags);
                if !resolved.is_wholly_known() {
                    debug!(address = %addr, unknown = ?resolved.unknown, "Configuration not wholly known");
                }
                pctx.config.set(resolved)?;
            }

            Self::GetProvider => {
                let provider = ctx
                    .providers
                    .get(&subject.provider)
                    .map_err(|e| InfraplanError::provider(addr, e))?;
                pctx.provider.set(provider)?;
            }

            Self::ValidateResource => {
                let provider = Arc::clone(pctx.provider.get()?);
                let config = pctx.config.get()?;
                let result = provider
                    .validate_resource(&address.resource_type, config)
                    .await;
                if result.has_errors() {
                    return Err(ConfigError::validation(error_summary(&result), addr).into());
                }
                for warning in result.warnings() {
                    debug!(address = %addr, "Ignoring validation warning: {}", warning.summary);
                }
            }

            Self::ReadState => {
                let prior = ctx
                    .state
                    .read()
                    .instance(&address.module, &address.state_key())
                    .cloned();
                pctx.prior_state.set(prior)?;
            }

            Self::DeferIfUnknownWithPriorState => {
                let known = pctx.config.get()?.is_wholly_known();
                let prior = pctx.prior_state.get()?;
                if !known && prior.is_some() {
                    write_state(ctx, subject, prior.clone());
                    write_diff(ctx, subject, None);
                    return Ok(StepOutcome::StopSuccessfully);
                }
            }

            Self::Diff => {
                let provider = Arc::clone(pctx.provider.get()?);
                let prior = pctx.prior_state.get()?.clone();
                let config = pctx.config.get()?;
                let info = InstanceInfo::new(address);

                let response = provider
                    .diff(&info, prior.as_ref(), config)
                    .await
                    .map_err(|e| InfraplanError::provider(addr.clone(), e))?;
                if response.diagnostics.has_errors() {
                    return Err(InfraplanError::provider(
                        addr,
                        ProviderError::call_failed("diff", error_summary(&response.diagnostics)),
                    ));
                }
                let config_known = config.is_wholly_known();
                diags.extend(response.diagnostics);

                let mut diff = response.diff.unwrap_or_default();
                let exists = prior.as_ref().is_some_and(InstanceState::exists);

                if prior.as_ref().is_some_and(|p| p.tainted) {
                    diff.destroy_tainted = true;
                }
                if diff.requires_new() && exists {
                    diff.destroy = true;
                }
                if diff.requires_new() || diff.destroy_tainted || !exists {
                    let old_id = prior
                        .as_ref()
                        .and_then(|p| p.attributes.get("id").cloned())
                        .unwrap_or_default();
                    diff.attributes
                        .entry(String::from("id"))
                        .or_insert_with(|| AttributeDiff::computed(old_id).forces_new());
                }
                diff.wholly_known = response.wholly_known && config_known && !subject.placeholder;

                let planned = if diff.is_empty() {
                    prior
                } else {
                    Some(InstanceState::merge_diff(prior.as_ref(), &diff))
                };
                debug!(address = %addr, change = %diff.change_type(), "Computed diff");
                pctx.diff.set((!diff.is_empty()).then_some(diff))?;
                pctx.planned_state.set(planned)?;
            }

            Self::CheckPreventDestroy => {
                let guarded = subject
                    .config
                    .as_ref()
                    .is_some_and(|c| c.lifecycle.prevent_destroy);
                if guarded && pctx.diff.get()?.as_ref().is_some_and(InstanceDiff::destroys) {
                    return Err(InfraplanError::PreventDestroy { address: addr });
                }
            }

            Self::WriteDiff => {
                write_diff(ctx, subject, pctx.diff.get()?.clone());
            }

            Self::DeferIfUnresolved => {
                let known = pctx.config.get()?.is_wholly_known();
                let has_depends_on = subject
                    .config
                    .as_ref()
                    .is_some_and(|c| !c.depends_on.is_empty());
                if !known || has_depends_on {
                    debug!(address = %addr, "Deferring data source read to plan");
                    return Ok(StepOutcome::StopSuccessfully);
                }
            }

            Self::ReadDataDiff => {
                let provider = Arc::clone(pctx.provider.get()?);
                let config = pctx.config.get()?;
                let info = InstanceInfo::new(address);

                let mut diff = provider
                    .read_data_diff(&info, config)
                    .await
                    .map_err(|e| InfraplanError::provider(addr, e))?
                    .unwrap_or_default();
                diff.attributes
                    .entry(String::from("id"))
                    .or_insert_with(|| AttributeDiff::computed("").forces_new());
                diff.wholly_known = config.is_wholly_known();

                let planned = InstanceState::merge_diff(None, &diff);
                pctx.diff.set(Some(diff))?;
                pctx.planned_state.set(Some(planned))?;
            }

            Self::ReadDataApply => {
                let provider = Arc::clone(pctx.provider.get()?);
                let applied = match pctx.diff.get()? {
                    Some(diff) if !diff.destroys() => {
                        let info = InstanceInfo::new(address);
                        provider
                            .read_data_apply(&info, diff)
                            .await
                            .map_err(|e| InfraplanError::provider(addr, e))?
                    }
                    _ => None,
                };
                pctx.applied_state.set(applied)?;
            }

            Self::SkipIfAlreadyRead => {
                let known = pctx.config.get()?.is_wholly_known();
                if known && pctx.prior_state.get()?.is_some() {
                    return Ok(StepOutcome::StopSuccessfully);
                }
            }

            Self::DiffDestroy => {
                let diff = pctx
                    .prior_state
                    .get()?
                    .as_ref()
                    .filter(|p| p.exists())
                    .map(|_| InstanceDiff::destroy_only());
                pctx.diff.set(diff)?;
            }

            Self::RemoveState => {
                if ctx
                    .state
                    .write()
                    .remove(&address.module, &address.state_key())
                    .is_none()
                {
                    warn!(address = %addr, "No state entry to remove");
                }
            }
        }

        Ok(StepOutcome::Continue)
    }
}
