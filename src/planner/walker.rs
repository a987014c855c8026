//! Concurrent graph walker.
//!
//! Nodes are visited in dependency waves: every node whose dependencies
//! have all been visited is started at once on a tokio task. Pipeline runs
//! are bounded by a semaphore; expansion and sub-graph walks are not, so a
//! resource waiting on its sub-graph never holds a permit.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::diagnostics::Diagnostics;
use crate::error::InfraplanError;
use crate::eval::{EvalContext, InstancePipeline, PipelineOutcome};
use crate::graph::{Graph, GraphNode, NodeId};

/// Final status of one visited node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Evaluated successfully.
    Completed,
    /// Ended early without failing; the work waits for a later phase.
    Deferred,
    /// Evaluation failed.
    Failed,
    /// Not evaluated because a dependency failed.
    Skipped,
}

/// Status of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node name.
    pub name: String,
    /// Final status.
    pub status: NodeStatus,
}

/// Outcome of a whole walk, sub-graphs included.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkReport {
    /// Every visited node, ordered by name.
    pub nodes: Vec<NodeReport>,
    /// Everything reported by every node.
    pub diagnostics: Diagnostics,
}

impl WalkReport {
    /// Returns true if any node reported an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Number of nodes that ended with `status`.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// Status of the node named `name`.
    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<NodeStatus> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.status)
    }

    fn push(&mut self, name: String, status: NodeStatus) {
        self.nodes.push(NodeReport { name, status });
    }
}

/// Result of visiting one node.
struct Visit {
    status: NodeStatus,
    report: WalkReport,
}

/// Walks graphs with a shared evaluation context.
#[derive(Debug, Clone)]
pub struct GraphWalker {
    ctx: EvalContext,
    semaphore: Arc<Semaphore>,
}

impl GraphWalker {
    /// Creates a walker running at most `parallelism` pipelines at once.
    #[must_use]
    pub fn new(ctx: EvalContext, parallelism: usize) -> Self {
        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Returns the evaluation context.
    #[must_use]
    pub const fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Walks `graph`, expanding resource nodes as they are reached.
    pub async fn walk(&self, graph: &Graph) -> WalkReport {
        info!(
            graph = graph.name(),
            operation = %self.ctx.operation,
            nodes = graph.len(),
            "Walking graph"
        );
        let mut report = walk_graph(
            self.ctx.clone(),
            Arc::clone(&self.semaphore),
            Arc::new(graph.clone()),
        )
        .await;
        report.nodes.sort_by(|a, b| a.name.cmp(&b.name));

        if report.has_errors() {
            error!(
                graph = graph.name(),
                failed = report.count(NodeStatus::Failed),
                skipped = report.count(NodeStatus::Skipped),
                "Walk finished with errors"
            );
        } else {
            info!(
                graph = graph.name(),
                completed = report.count(NodeStatus::Completed),
                deferred = report.count(NodeStatus::Deferred),
                "Walk finished"
            );
        }
        report
    }
}

fn walk_graph(
    ctx: EvalContext,
    semaphore: Arc<Semaphore>,
    graph: Arc<Graph>,
) -> Pin<Box<dyn Future<Output = WalkReport> + Send>> {
    Box::pin(async move {
        let mut report = WalkReport::default();
        let mut status: HashMap<NodeId, NodeStatus> = HashMap::new();
        let mut pending: HashSet<NodeId> = graph.node_ids().into_iter().collect();

        loop {
            let mut wave: Vec<NodeId> = pending
                .iter()
                .filter(|id| graph.dependencies(**id).iter().all(|d| status.contains_key(d)))
                .copied()
                .collect();
            if wave.is_empty() {
                break;
            }
            wave.sort();

            let mut tasks = JoinSet::new();
            for id in &wave {
                pending.remove(id);
                let Some(node) = graph.node(*id) else {
                    continue;
                };

                let blocked = graph.dependencies(*id).iter().any(|d| {
                    matches!(
                        status.get(d),
                        Some(NodeStatus::Failed | NodeStatus::Skipped)
                    )
                });
                if blocked {
                    warn!(node = %node, "Skipping: a dependency failed");
                    status.insert(*id, NodeStatus::Skipped);
                    report.push(node.name(), NodeStatus::Skipped);
                    continue;
                }

                let node = node.clone();
                let ctx = ctx.clone();
                let semaphore = Arc::clone(&semaphore);
                let id = *id;
                tasks.spawn(async move { (id, visit(ctx, semaphore, node).await) });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, visit)) => {
                        status.insert(id, visit.status);
                        report.nodes.extend(visit.report.nodes);
                        report.diagnostics.extend(visit.report.diagnostics);
                    }
                    Err(err) => {
                        error!("Node task aborted: {err}");
                        report
                            .diagnostics
                            .append(InfraplanError::internal(format!("node task aborted: {err}")));
                    }
                }
            }

            for id in wave {
                if status.contains_key(&id) {
                    continue;
                }
                status.insert(id, NodeStatus::Failed);
                if let Some(node) = graph.node(id) {
                    report.push(node.name(), NodeStatus::Failed);
                }
            }
        }

        for id in pending {
            if let Some(node) = graph.node(id) {
                warn!(node = %node, "Never reached");
                report.push(node.name(), NodeStatus::Skipped);
            }
        }
        report
    })
}

async fn visit(ctx: EvalContext, semaphore: Arc<Semaphore>, node: GraphNode) -> Visit {
    let name = node.name();
    let mut report = WalkReport::default();

    let status = match node {
        GraphNode::Root => {
            return Visit {
                status: NodeStatus::Completed,
                report,
            };
        }
        GraphNode::Resource(resource) => match resource.dynamic_expand(&ctx) {
            Ok(sub_graph) => {
                debug!(node = %name, nodes = sub_graph.len(), "Walking expanded resource");
                let sub_report = walk_graph(ctx, semaphore, Arc::new(sub_graph)).await;
                let failed = sub_report.has_errors();
                report.nodes.extend(sub_report.nodes);
                report.diagnostics.extend(sub_report.diagnostics);
                if failed {
                    NodeStatus::Failed
                } else {
                    NodeStatus::Completed
                }
            }
            Err(diags) => {
                error!(node = %name, "Expansion failed");
                report.diagnostics.extend(diags);
                NodeStatus::Failed
            }
        },
        GraphNode::Instance(instance) => {
            run_pipeline(
                &ctx,
                &semaphore,
                InstancePipeline::for_instance(&instance, ctx.operation),
                &mut report.diagnostics,
            )
            .await
        }
        GraphNode::Orphan(orphan) => {
            run_pipeline(
                &ctx,
                &semaphore,
                InstancePipeline::for_orphan(&orphan, ctx.operation),
                &mut report.diagnostics,
            )
            .await
        }
    };

    report.push(name, status);
    Visit { status, report }
}

async fn run_pipeline(
    ctx: &EvalContext,
    semaphore: &Semaphore,
    pipeline: Option<InstancePipeline>,
    diagnostics: &mut Diagnostics,
) -> NodeStatus {
    let Some(pipeline) = pipeline else {
        return NodeStatus::Completed;
    };

    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(err) => {
            diagnostics.append(InfraplanError::internal(format!("walk cancelled: {err}")));
            return NodeStatus::Failed;
        }
    };

    let result = pipeline.run(ctx).await;
    diagnostics.extend(result.diagnostics);
    match result.outcome {
        PipelineOutcome::Completed => NodeStatus::Completed,
        PipelineOutcome::Deferred => NodeStatus::Deferred,
        PipelineOutcome::Failed => NodeStatus::Failed,
    }
}
