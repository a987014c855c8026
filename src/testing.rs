//! Test doubles shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::ProviderError;
use crate::eval::{
    CountEvaluator, CountValue, EvalContext, MockCountEvaluator, ResolvedConfig, StateResolver,
    flatten_value,
};
use crate::planner::diff::{AttributeDiff, InstanceDiff, PlanDiff};
use crate::provider::{DiffResponse, InstanceInfo, ProviderRegistry, ResourceProvider};
use crate::state::{InstanceState, State};

/// A provider call recorded by [`SpyProvider`], with the instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProviderCall {
    Validate(String),
    Diff(String),
    ReadDataDiff(String),
    ReadDataApply(String),
}

/// Provider that diffs config values against state attributes and records
/// every call.
#[derive(Debug, Default)]
pub(crate) struct SpyProvider {
    calls: Mutex<Vec<ProviderCall>>,
    force_new: BTreeSet<String>,
    diff_error: Option<String>,
    validation_error: Option<String>,
    validation_warning: Option<String>,
    data_attributes: BTreeMap<String, String>,
}

impl SpyProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_force_new(mut self, attr: &str) -> Self {
        self.force_new.insert(attr.to_string());
        self
    }

    pub(crate) fn with_diff_error(mut self, message: &str) -> Self {
        self.diff_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_validation_error(mut self, message: &str) -> Self {
        self.validation_error = Some(message.to_string());
        self
    }

    pub(crate) fn with_validation_warning(mut self, message: &str) -> Self {
        self.validation_warning = Some(message.to_string());
        self
    }

    pub(crate) fn with_data_attr(mut self, key: &str, value: &str) -> Self {
        self.data_attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn diff_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::Diff(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ResourceProvider for SpyProvider {
    async fn validate_resource(&self, resource_type: &str, _config: &ResolvedConfig) -> Diagnostics {
        self.record(ProviderCall::Validate(resource_type.to_string()));
        let mut diags = Diagnostics::new();
        if let Some(msg) = &self.validation_warning {
            diags.append(Diagnostic::warning(msg.clone()));
        }
        if let Some(msg) = &self.validation_error {
            diags.append(Diagnostic::error(msg.clone()));
        }
        diags
    }

    async fn diff(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        config: &ResolvedConfig,
    ) -> Result<DiffResponse, ProviderError> {
        self.record(ProviderCall::Diff(info.id.clone()));
        if let Some(msg) = &self.diff_error {
            return Err(ProviderError::call_failed("diff", msg.clone()));
        }

        let mut diff = InstanceDiff::new();
        for (key, value) in &config.values {
            let old = state
                .and_then(|s| s.attributes.get(key).cloned())
                .unwrap_or_default();
            let change = if config.unknown.contains(key) {
                AttributeDiff::computed(old)
            } else {
                let new = flatten_value(value);
                if old == new {
                    continue;
                }
                AttributeDiff::change(old, new)
            };
            let change = if self.force_new.contains(key) {
                change.forces_new()
            } else {
                change
            };
            diff.attributes.insert(key.clone(), change);
        }

        Ok(DiffResponse::known((!diff.is_empty()).then_some(diff)))
    }

    async fn read_data_diff(
        &self,
        info: &InstanceInfo,
        _config: &ResolvedConfig,
    ) -> Result<Option<InstanceDiff>, ProviderError> {
        self.record(ProviderCall::ReadDataDiff(info.id.clone()));
        Ok(None)
    }

    async fn read_data_apply(
        &self,
        info: &InstanceInfo,
        _diff: &InstanceDiff,
    ) -> Result<Option<InstanceState>, ProviderError> {
        self.record(ProviderCall::ReadDataApply(info.id.clone()));
        let mut state = InstanceState::new(format!("{}-read", info.id));
        for (k, v) in &self.data_attributes {
            state = state.with_attr(k.clone(), v.clone());
        }
        Ok(Some(state))
    }
}

/// Count evaluator that always yields `value`.
pub(crate) fn fixed_count(value: CountValue) -> MockCountEvaluator {
    let mut mock = MockCountEvaluator::new();
    mock.expect_evaluate()
        .returning(move |_, _, _| (value, Diagnostics::new()));
    mock
}

/// Plan-phase context with `provider` registered as `aws`.
pub(crate) fn eval_context(state: State, provider: Arc<SpyProvider>) -> EvalContext {
    eval_context_with_count(state, provider, Arc::new(StateResolver::new()))
}

pub(crate) fn eval_context_with_count(
    state: State,
    provider: Arc<SpyProvider>,
    count_evaluator: Arc<dyn CountEvaluator>,
) -> EvalContext {
    let registry = ProviderRegistry::new().with_provider("aws", provider);
    EvalContext::new(
        state.into_shared(),
        PlanDiff::new().into_shared(),
        Arc::new(registry),
        Arc::new(StateResolver::new()),
        count_evaluator,
    )
}
