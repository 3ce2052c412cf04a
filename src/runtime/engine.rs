/// Petgraph-based DAG execution engine
///
/// Converts a node/edge graph into a petgraph DAG, rejects cycles up front and
/// then releases nodes reachable from the start set one at a time, each only
/// after all of its reachable predecessors have completed. Upstream outputs are
/// substituted into a node's parameters just before it runs.

use crate::{
    error::WorkflowError,
    runtime::{executor::NodeExecutor, template::substitute},
    workflow::types::{
        ExecutionContext, NodeResult, RunStatus, WorkflowNode, WorkflowRunRequest,
        WorkflowRunResult,
    },
};
use chrono::Utc;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use uuid::Uuid;

/// DAG execution engine using petgraph for workflow orchestration
///
/// Stateless between runs; the output cache lives only for one `execute` call.
pub struct ExecutionEngine {
    /// Node executor for handling individual node execution
    executor: Arc<NodeExecutor>,
}

/// Internal representation of a workflow as a petgraph DAG
#[derive(Debug)]
struct WorkflowGraph {
    /// Node weights are indices into the request's node list
    graph: DiGraph<usize, ()>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// Successors per graph index, in edge declaration order
    successors: Vec<Vec<NodeIndex>>,
}

impl WorkflowGraph {
    fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph.neighbors_directed(index, Direction::Incoming).count()
    }
}

impl ExecutionEngine {
    /// Create new execution engine with node executor
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Run a workflow graph to completion or first failure
    ///
    /// Structural problems (unknown start node, cycles) are returned as errors
    /// before any node executes. Node failures are reported in the result.
    pub async fn execute(&self, request: WorkflowRunRequest) -> Result<WorkflowRunResult, WorkflowError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let workflow_start_time = std::time::Instant::now();

        tracing::info!(
            "🚀 Starting workflow run {} ({} nodes, {} edges)",
            run_id,
            request.nodes.len(),
            request.edges.len()
        );

        let graph = self.build_workflow_graph(&request)?;
        let start_nodes = self.find_start_nodes(&graph, &request)?;
        let reachable = self.find_reachable_nodes(&graph, &start_nodes);

        // In-degrees restricted to the reachable subgraph
        let mut pending: HashMap<NodeIndex, usize> = reachable.iter().map(|&idx| (idx, 0)).collect();
        for &idx in &reachable {
            for target in &graph.successors[idx.index()] {
                if let Some(count) = pending.get_mut(target) {
                    *count += 1;
                }
            }
        }

        let mut ready: VecDeque<NodeIndex> = start_nodes
            .iter()
            .copied()
            .filter(|idx| pending.get(idx) == Some(&0))
            .collect();

        tracing::info!(
            "🔄 Executing up to {} nodes reachable from {} start node(s)",
            reachable.len(),
            start_nodes.len()
        );

        let root = request.root_directory.as_deref();
        let mut context = ExecutionContext::for_nodes(&request.nodes);
        let mut results: Vec<NodeResult> = Vec::new();
        let mut execution_order = Vec::new();
        let mut failed_node_id = None;

        while let Some(idx) = ready.pop_front() {
            let node = &request.nodes[graph.graph[idx]];
            execution_order.push(node.id.clone());

            tracing::debug!(
                "📍 Step {}: Executing node '{}' (type: {})",
                execution_order.len(),
                node.display_name(),
                node.kind.type_name()
            );

            let prepared = WorkflowNode {
                kind: node.kind.map_parameters(&|text| substitute(text, &context)),
                ..node.clone()
            };
            let execution = self.executor.execute_node(&prepared, &context, root).await;

            if let Some(dir) = execution.working_dir {
                context.working_dir = Some(dir);
            }
            if let Some(output) = execution.context_output {
                context.record_output(&node.id, output);
            }

            let failed = execution.result.is_failed();
            results.push(execution.result);
            if failed {
                tracing::warn!("⏸️ Workflow run {} stopped at node '{}'", run_id, node.id);
                failed_node_id = Some(node.id.clone());
                break;
            }

            for target in &graph.successors[idx.index()] {
                if let Some(count) = pending.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*target);
                    }
                }
            }
        }

        let success = failed_node_id.is_none();
        let duration = workflow_start_time.elapsed();
        if success {
            tracing::info!("🎉 Workflow run {} completed successfully in {:?}", run_id, duration);
        } else {
            tracing::error!(
                "❌ Workflow run {} failed at node '{}' after {:?}",
                run_id,
                failed_node_id.as_deref().unwrap_or_default(),
                duration
            );
        }

        Ok(WorkflowRunResult {
            run_id,
            status: if success { RunStatus::Completed } else { RunStatus::Failed },
            success,
            results,
            execution_order,
            failed_node_id,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Explicit start node, else trigger nodes, else graph sources
    fn find_start_nodes(
        &self,
        graph: &WorkflowGraph,
        request: &WorkflowRunRequest,
    ) -> Result<Vec<NodeIndex>, WorkflowError> {
        if let Some(start_node_id) = &request.start_node_id {
            let index = graph
                .node_id_to_index
                .get(start_node_id)
                .ok_or_else(|| WorkflowError::StartNodeNotFound {
                    id: start_node_id.clone(),
                })?;
            return Ok(vec![*index]);
        }

        let indices: Vec<NodeIndex> = graph.graph.node_indices().collect();

        let triggers: Vec<NodeIndex> = indices
            .iter()
            .copied()
            .filter(|&idx| request.nodes[graph.graph[idx]].kind.type_name() == "trigger")
            .collect();
        if !triggers.is_empty() {
            tracing::debug!("🎯 Starting from {} trigger node(s)", triggers.len());
            return Ok(triggers);
        }

        let sources: Vec<NodeIndex> = indices
            .into_iter()
            .filter(|&idx| graph.in_degree(idx) == 0)
            .collect();
        tracing::debug!("🎯 No trigger nodes, starting from {} source node(s)", sources.len());
        Ok(sources)
    }

    /// Find all nodes reachable from the start nodes using BFS
    fn find_reachable_nodes(&self, graph: &WorkflowGraph, start_nodes: &[NodeIndex]) -> HashSet<NodeIndex> {
        let mut reachable: HashSet<NodeIndex> = start_nodes.iter().copied().collect();
        let mut queue: VecDeque<NodeIndex> = start_nodes.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            for &target in &graph.successors[current.index()] {
                if reachable.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        reachable
    }

    /// Build a petgraph DiGraph from the request
    ///
    /// Duplicate node ids keep the first occurrence; edges pointing at unknown
    /// nodes are skipped. Fails with [`WorkflowError::Cycle`] if the result is
    /// not a DAG.
    fn build_workflow_graph(&self, request: &WorkflowRunRequest) -> Result<WorkflowGraph, WorkflowError> {
        tracing::debug!(
            "📊 Building workflow DAG with {} nodes and {} edges",
            request.nodes.len(),
            request.edges.len()
        );

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for (position, node) in request.nodes.iter().enumerate() {
            if node_id_to_index.contains_key(&node.id) {
                tracing::warn!("⚠️ Duplicate node id '{}', keeping the first definition", node.id);
                continue;
            }
            let node_index = graph.add_node(position);
            node_id_to_index.insert(node.id.clone(), node_index);
        }

        let mut successors = vec![Vec::new(); graph.node_count()];
        for edge in &request.edges {
            let (Some(&from), Some(&to)) = (
                node_id_to_index.get(&edge.source),
                node_id_to_index.get(&edge.target),
            ) else {
                tracing::warn!(
                    "⚠️ Skipping edge '{}': unknown endpoint ({} → {})",
                    edge.id,
                    edge.source,
                    edge.target
                );
                continue;
            };

            if successors[from.index()].contains(&to) {
                continue;
            }
            graph.add_edge(from, to, ());
            successors[from.index()].push(to);
            tracing::debug!("  🔗 Added edge: '{}' → '{}'", edge.source, edge.target);
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node_id = request.nodes[graph[cycle.node_id()]].id.clone();
            tracing::error!("❌ Workflow contains a cycle through node '{}'", node_id);
            return Err(WorkflowError::Cycle { node_id });
        }

        Ok(WorkflowGraph {
            graph,
            node_id_to_index,
            successors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::NodeRunner;
    use crate::workflow::types::{
        AgentConfig, NodeKind, NodeStatus, ScriptConfig, TriggerNodeConfig, WorkdirConfig, WorkflowEdge,
    };
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Agent runner that echoes its (substituted) prompt; script runner fails
    /// when its first arg is "fail"
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String, Option<PathBuf>)>>,
    }

    #[async_trait]
    impl NodeRunner for Recorder {
        async fn run(&self, node: &WorkflowNode, working_dir: Option<&Path>) -> anyhow::Result<String> {
            let text = match &node.kind {
                NodeKind::Agent(config) => config.prompt.clone(),
                NodeKind::Script(config) if config.args.first().map(String::as_str) == Some("fail") => {
                    anyhow::bail!("script {} failed", node.id)
                }
                NodeKind::Script(config) => config.args.join(" "),
                _ => String::new(),
            };
            self.seen
                .lock()
                .unwrap()
                .push((node.id.clone(), text.clone(), working_dir.map(Path::to_path_buf)));
            Ok(format!("{text}\n"))
        }
    }

    fn engine(recorder: &Arc<Recorder>) -> ExecutionEngine {
        let executor = NodeExecutor::new()
            .with_runner("agent", recorder.clone())
            .with_runner("script", recorder.clone());
        ExecutionEngine::new(Arc::new(executor))
    }

    fn trigger(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, NodeKind::Trigger(TriggerNodeConfig::default()))
    }

    fn agent(id: &str, prompt: &str) -> WorkflowNode {
        WorkflowNode::new(
            id,
            NodeKind::Agent(AgentConfig {
                prompt: prompt.to_string(),
                ..AgentConfig::default()
            }),
        )
    }

    fn script(id: &str, arg: &str) -> WorkflowNode {
        WorkflowNode::new(
            id,
            NodeKind::Script(ScriptConfig {
                path: None,
                args: vec![arg.to_string()],
            }),
        )
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<WorkflowEdge> {
        pairs.iter().map(|(s, t)| WorkflowEdge::new(*s, *t)).collect()
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_with_templates() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![
                trigger("t"),
                agent("a", "first").with_label("Draft Notes"),
                agent("b", "got {{ a.output }} / {{ draft_notes.output }} / {{ nope.output }}"),
            ],
            edges(&[("t", "a"), ("a", "b")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.execution_order, vec!["t", "a", "b"]);
        assert_eq!(result.results.len(), 3);
        assert!(result.results.iter().all(|r| r.status == NodeStatus::Completed));

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[1].1, "got first / first / {{ nope.output }}");
    }

    #[tokio::test]
    async fn test_failure_stops_traversal() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("trigger"), script("shellA", "fail"), agent("shellB", "never")],
            edges(&[("trigger", "shellA"), ("shellA", "shellB")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.execution_order, vec!["trigger", "shellA"]);
        assert_eq!(result.failed_node_id.as_deref(), Some("shellA"));
        assert!(result.results.iter().all(|r| r.node_id != "shellB"));
        assert!(result.failure().unwrap().error.as_deref().unwrap().contains("shellA"));
    }

    #[tokio::test]
    async fn test_diamond_runs_join_once_after_both_branches() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![
                trigger("t"),
                agent("left", "L"),
                agent("right", "R"),
                agent("join", "{{ left.output }}+{{ right.output }}"),
            ],
            edges(&[("t", "left"), ("t", "right"), ("left", "join"), ("right", "join")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();

        assert_eq!(result.execution_order, vec!["t", "left", "right", "join"]);
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.last().unwrap().1, "L+R");
    }

    #[tokio::test]
    async fn test_join_waits_for_longer_branch() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("t"), agent("a", "a"), agent("a2", "a2"), agent("b", "b"), agent("join", "j")],
            edges(&[("t", "a"), ("a", "a2"), ("t", "b"), ("a2", "join"), ("b", "join")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();
        assert_eq!(result.execution_order, vec!["t", "a", "b", "a2", "join"]);
    }

    #[tokio::test]
    async fn test_explicit_start_node_limits_execution() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("t1"), agent("a", "a"), trigger("t2"), agent("b", "b")],
            edges(&[("t1", "a"), ("t2", "b")]),
        )
        .with_start_node("t2");

        let result = engine(&recorder).execute(request).await.unwrap();
        assert_eq!(result.execution_order, vec!["t2", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_start_node_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(vec![trigger("t")], Vec::new()).with_start_node("missing");

        let err = engine(&recorder).execute(request).await.unwrap_err();
        assert!(matches!(err, WorkflowError::StartNodeNotFound { id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_sources_used_without_trigger_nodes() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![agent("b", "b"), agent("a", "a"), agent("c", "c")],
            edges(&[("a", "c"), ("b", "c")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();
        assert_eq!(result.execution_order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_in_degree_counts_each_incoming_edge_once() {
        let engine = ExecutionEngine::new(Arc::new(NodeExecutor::new()));
        let request = WorkflowRunRequest::new(
            vec![agent("a", "a"), agent("b", "b"), agent("c", "c")],
            edges(&[("a", "c"), ("b", "c"), ("a", "c"), ("a", "b")]),
        );

        let graph = engine.build_workflow_graph(&request).unwrap();
        let index = |id: &str| graph.node_id_to_index[id];
        assert_eq!(graph.in_degree(index("a")), 0);
        assert_eq!(graph.in_degree(index("b")), 1);
        assert_eq!(graph.in_degree(index("c")), 2);
    }

    #[tokio::test]
    async fn test_unreachable_nodes_do_not_run() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("t"), agent("a", "a"), agent("orphan", "o")],
            edges(&[("t", "a")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();
        assert_eq!(result.execution_order, vec!["t", "a"]);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_execution() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("t"), agent("a", "a"), agent("b", "b")],
            edges(&[("t", "a"), ("a", "b"), ("b", "a")]),
        );

        let err = engine(&recorder).execute(request).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cycle { .. }));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_edges_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![trigger("t"), agent("a", "a")],
            edges(&[("t", "a"), ("a", "ghost"), ("ghost", "t")]),
        );

        let result = engine(&recorder).execute(request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.execution_order, vec!["t", "a"]);
    }

    #[tokio::test]
    async fn test_workdir_is_inherited_downstream() {
        let recorder = Arc::new(Recorder::default());
        let request = WorkflowRunRequest::new(
            vec![
                trigger("t"),
                WorkflowNode::new(
                    "w",
                    NodeKind::Workdir(WorkdirConfig {
                        path: Some("repo".to_string()),
                    }),
                ),
                agent("a", "in {{ w.output }}"),
            ],
            edges(&[("t", "w"), ("w", "a")]),
        )
        .with_root("/srv");

        let result = engine(&recorder).execute(request).await.unwrap();
        assert!(result.success);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].1, "in /srv/repo");
        assert_eq!(seen[0].2, Some(PathBuf::from("/srv/repo")));
    }

    #[tokio::test]
    async fn test_empty_graph_succeeds() {
        let recorder = Arc::new(Recorder::default());
        let result = engine(&recorder)
            .execute(WorkflowRunRequest::default())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.execution_order.is_empty());
    }
}
