//! Dependency-driven traversal of a stack's services.
//!
//! The graph is built from the services' `depends_on` edges. Only *required*
//! edges constrain ordering; optional edges are advisory and never block.
//!
//! [`DependencyGraph::walk`] schedules node actions as soon as their
//! predecessors completed, so independent branches run concurrently and the
//! only serialization is the one induced by edges:
//!
//! - [`Direction::Up`]: a service runs after its dependencies.
//! - [`Direction::Down`]: a service runs after every service that depends
//!   on it.

use crate::context::OperationContext;
use crate::model::Project;
use crate::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::future::Future;
use tracing::{debug, info, warn};

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies first (bring-up)
    Up,
    /// Dependents first (teardown)
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    target: String,
    required: bool,
}

/// Scheduling state of a node during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Done,
    Failed,
}

/// Dependency graph over service names
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// node -> services it depends on
    dependencies: HashMap<String, Vec<Edge>>,
    /// node -> services depending on it
    dependents: HashMap<String, Vec<Edge>>,
}

impl DependencyGraph {
    /// Build the graph of a project.
    ///
    /// Edges pointing at services absent from the model are dropped: there is
    /// nothing to order against.
    pub fn from_project(project: &Project) -> Self {
        let mut graph = Self::default();
        for name in project.services.keys() {
            graph.add_node(name);
        }

        for (name, service) in &project.services {
            for (dependency, edge) in &service.depends_on {
                if !project.services.contains_key(dependency) {
                    debug!(
                        "Ignoring dependency of '{}' on undeclared service '{}'",
                        name, dependency
                    );
                    continue;
                }
                graph.add_edge(name, dependency, edge.required);
            }
        }

        graph
    }

    /// Add a node
    pub fn add_node(&mut self, name: &str) {
        self.nodes.insert(name.to_string());
    }

    /// Declare that `service` depends on `dependency`
    pub fn add_edge(&mut self, service: &str, dependency: &str, required: bool) {
        self.add_node(service);
        self.add_node(dependency);
        self.dependencies
            .entry(service.to_string())
            .or_default()
            .push(Edge {
                target: dependency.to_string(),
                required,
            });
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .push(Edge {
                target: service.to_string(),
                required,
            });
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edges followed when walking in `direction`, i.e. towards the nodes that
    /// must wait for `node`
    fn successors(&self, node: &str, direction: Direction) -> &[Edge] {
        let edges = match direction {
            Direction::Up => self.dependents.get(node),
            Direction::Down => self.dependencies.get(node),
        };
        edges.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges towards the nodes `node` must wait for
    fn predecessors(&self, node: &str, direction: Direction) -> &[Edge] {
        let edges = match direction {
            Direction::Up => self.dependencies.get(node),
            Direction::Down => self.dependents.get(node),
        };
        edges.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes a walk from `roots` visits.
    ///
    /// Bring-up pulls in every transitive dependency of the roots, teardown
    /// every transitive dependent. Empty roots select the whole graph.
    pub fn closure(&self, direction: Direction, roots: &[String]) -> Result<BTreeSet<String>> {
        if roots.is_empty() {
            return Ok(self.nodes.clone());
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        for root in roots {
            if !self.nodes.contains(root) {
                return Err(Error::ServiceNotFound(root.clone()));
            }
            queue.push_back(root.clone());
        }

        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.clone()) {
                continue;
            }
            // Walking down from a root reaches what depends on it: the nodes
            // that must run before it.
            for edge in self.predecessors(&node, direction) {
                if !visited.contains(&edge.target) {
                    queue.push_back(edge.target.clone());
                }
            }
        }

        Ok(visited)
    }

    /// Required predecessors of every node in `scope`, restricted to `scope`
    fn blocking_edges(
        &self,
        scope: &BTreeSet<String>,
        direction: Direction,
    ) -> BTreeMap<String, Vec<String>> {
        scope
            .iter()
            .map(|node| {
                let blockers = self
                    .predecessors(node, direction)
                    .iter()
                    .filter(|edge| edge.required && scope.contains(&edge.target))
                    .map(|edge| edge.target.clone())
                    .collect();
                (node.clone(), blockers)
            })
            .collect()
    }

    /// Order in which a sequential walk would visit the closure of `roots`.
    ///
    /// Fails with [`Error::DependencyCycle`] naming the nodes on or behind a
    /// cycle of required edges.
    pub fn topological_sort(&self, direction: Direction, roots: &[String]) -> Result<Vec<String>> {
        let scope = self.closure(direction, roots)?;
        let blockers = self.blocking_edges(&scope, direction);

        let mut in_degree: BTreeMap<&str, usize> = blockers
            .iter()
            .map(|(node, blocking)| (node.as_str(), blocking.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();
        let mut order = Vec::with_capacity(scope.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for edge in self.successors(node, direction) {
                if !edge.required {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(edge.target.as_str());
                    }
                }
            }
        }

        if order.len() != scope.len() {
            let stuck = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(node, _)| node.to_string())
                .collect();
            return Err(Error::DependencyCycle(stuck));
        }

        Ok(order)
    }

    /// Run `action` once for every node in the closure of `roots`.
    ///
    /// Actions are spawned on the task pool as soon as all their required
    /// predecessors succeeded. When an action fails, unrelated branches keep
    /// going; nodes behind the failed one are never invoked. The first failure
    /// is returned once nothing is left running.
    pub async fn walk<F, Fut>(
        &self,
        ctx: &OperationContext,
        direction: Direction,
        roots: &[String],
        action: F,
    ) -> Result<()>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Rejects cycles up front; the scheduler below relies on it.
        self.topological_sort(direction, roots)?;
        let scope = self.closure(direction, roots)?;
        let blockers = self.blocking_edges(&scope, direction);

        let mut states: BTreeMap<String, NodeState> = scope
            .iter()
            .map(|node| (node.clone(), NodeState::Waiting))
            .collect();
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<Error> = None;

        info!("Walking {} services ({:?})", scope.len(), direction);

        loop {
            if ctx.is_cancelled() {
                if first_error.is_none() {
                    first_error = Some(Error::Cancelled);
                }
            } else {
                let ready: Vec<String> = states
                    .iter()
                    .filter(|&(node, &state)| {
                        state == NodeState::Waiting
                            && blockers[node]
                                .iter()
                                .all(|blocker| states[blocker] == NodeState::Done)
                    })
                    .map(|(node, _)| node.clone())
                    .collect();

                for node in ready {
                    debug!("Scheduling '{}'", node);
                    states.insert(node.clone(), NodeState::Running);
                    let work = action(node.clone());
                    in_flight.push(smol::spawn(async move { (node, work.await) }));
                }
            }

            let Some((node, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(()) => {
                    debug!("Completed '{}'", node);
                    states.insert(node, NodeState::Done);
                }
                Err(e) => {
                    warn!("Failed '{}': {}", node, e);
                    states.insert(node.clone(), NodeState::Failed);
                    self.fail_behind(&node, direction, &blockers, &mut states);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let blocked: Vec<String> = states
            .into_iter()
            .filter(|&(_, state)| state != NodeState::Done)
            .map(|(node, _)| node)
            .collect();
        if !blocked.is_empty() {
            return Err(Error::Stalled(blocked));
        }

        Ok(())
    }

    /// Mark every waiting node that transitively requires `failed` as failed
    fn fail_behind(
        &self,
        failed: &str,
        direction: Direction,
        blockers: &BTreeMap<String, Vec<String>>,
        states: &mut BTreeMap<String, NodeState>,
    ) {
        let mut queue = VecDeque::from([failed.to_string()]);
        while let Some(node) = queue.pop_front() {
            for edge in self.successors(&node, direction) {
                let skipped = &edge.target;
                if states.get(skipped) != Some(&NodeState::Waiting)
                    || !blockers[skipped].contains(&node)
                {
                    continue;
                }
                let e = Error::DependencyFailed {
                    service: skipped.clone(),
                    dependency: node.clone(),
                };
                warn!("{}", e);
                states.insert(skipped.clone(), NodeState::Failed);
                queue.push_back(skipped.clone());
            }
        }
    }
}

/// Run `action` for the services of `project` in dependency order
pub async fn in_dependency_order<F, Fut>(
    ctx: &OperationContext,
    project: &Project,
    roots: &[String],
    action: F,
) -> Result<()>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    DependencyGraph::from_project(project)
        .walk(ctx, Direction::Up, roots, action)
        .await
}

/// Run `action` for the services of `project` in reverse dependency order
pub async fn in_reverse_dependency_order<F, Fut>(
    ctx: &OperationContext,
    project: &Project,
    roots: &[String],
    action: F,
) -> Result<()>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    DependencyGraph::from_project(project)
        .walk(ctx, Direction::Down, roots, action)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::ServiceNode;
    use crate::progress::TracingProgress;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn context() -> OperationContext {
        OperationContext::new(Arc::new(TracingProgress), &EngineConfig::default())
    }

    /// web -> api -> db, worker -> db, cache standalone
    fn create_test_project() -> Project {
        Project::new("demo")
            .with_service(ServiceNode::new("db"))
            .with_service(ServiceNode::new("cache"))
            .with_service(ServiceNode::new("api").depends_on("db", true))
            .with_service(ServiceNode::new("worker").depends_on("db", true))
            .with_service(ServiceNode::new("web").depends_on("api", true))
    }

    fn position(order: &[String], node: &str) -> usize {
        order.iter().position(|n| n == node).unwrap()
    }

    #[test]
    fn test_graph_creation() {
        let graph = DependencyGraph::from_project(&create_test_project());
        assert_eq!(graph.len(), 5);
        assert!(!graph.is_empty());
    }

    #[test]
    fn test_topological_sort_up() {
        let graph = DependencyGraph::from_project(&create_test_project());
        let order = graph.topological_sort(Direction::Up, &[]).unwrap();

        assert!(position(&order, "db") < position(&order, "api"));
        assert!(position(&order, "db") < position(&order, "worker"));
        assert!(position(&order, "api") < position(&order, "web"));
    }

    #[test]
    fn test_topological_sort_down() {
        let graph = DependencyGraph::from_project(&create_test_project());
        let order = graph.topological_sort(Direction::Down, &[]).unwrap();

        assert!(position(&order, "web") < position(&order, "api"));
        assert!(position(&order, "api") < position(&order, "db"));
        assert!(position(&order, "worker") < position(&order, "db"));
    }

    #[test]
    fn test_closure_down_includes_dependents() {
        let graph = DependencyGraph::from_project(&create_test_project());
        let scope = graph.closure(Direction::Down, &["api".to_string()]).unwrap();
        assert_eq!(
            scope.into_iter().collect::<Vec<_>>(),
            vec!["api".to_string(), "web".to_string()]
        );
    }

    #[test]
    fn test_closure_up_includes_dependencies() {
        let graph = DependencyGraph::from_project(&create_test_project());
        let scope = graph.closure(Direction::Up, &["web".to_string()]).unwrap();
        assert_eq!(
            scope.into_iter().collect::<Vec<_>>(),
            vec!["api".to_string(), "db".to_string(), "web".to_string()]
        );
    }

    #[test]
    fn test_closure_unknown_root() {
        let graph = DependencyGraph::from_project(&create_test_project());
        assert!(matches!(
            graph.closure(Direction::Down, &["nope".to_string()]),
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_undeclared_dependency_is_ignored() {
        let project = Project::new("demo")
            .with_service(ServiceNode::new("web").depends_on("gone", true));
        let graph = DependencyGraph::from_project(&project);
        assert_eq!(graph.len(), 1);
        assert_eq!(
            graph.topological_sort(Direction::Down, &[]).unwrap(),
            vec!["web".to_string()]
        );
    }

    #[test]
    fn test_circular_dependency_detection() {
        let project = Project::new("circular")
            .with_service(ServiceNode::new("a").depends_on("b", true))
            .with_service(ServiceNode::new("b").depends_on("a", true))
            .with_service(ServiceNode::new("c"));

        let graph = DependencyGraph::from_project(&project);
        match graph.topological_sort(Direction::Down, &[]) {
            Err(Error::DependencyCycle(nodes)) => {
                assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_optional_cycle_is_not_a_cycle() {
        let project = Project::new("loose")
            .with_service(ServiceNode::new("a").depends_on("b", false))
            .with_service(ServiceNode::new("b").depends_on("a", false));

        let graph = DependencyGraph::from_project(&project);
        assert_eq!(graph.topological_sort(Direction::Down, &[]).unwrap().len(), 2);
    }

    #[smol_potat::test]
    async fn test_walk_down_respects_order() {
        let project = create_test_project();
        let log = Arc::new(Mutex::new(Vec::new()));

        let recorder = log.clone();
        in_reverse_dependency_order(&context(), &project, &[], move |node| {
            let log = recorder.clone();
            async move {
                // Leaves finish late so that ordering bugs would show up
                if node == "web" || node == "worker" {
                    smol::Timer::after(Duration::from_millis(20)).await;
                }
                log.lock().unwrap().push(node);
                Ok(())
            }
        })
        .await
        .unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(order.len(), 5);
        assert!(position(&order, "web") < position(&order, "api"));
        assert!(position(&order, "api") < position(&order, "db"));
        assert!(position(&order, "worker") < position(&order, "db"));
    }

    #[smol_potat::test]
    async fn test_walk_up_respects_order() {
        let project = create_test_project();
        let log = Arc::new(Mutex::new(Vec::new()));

        let recorder = log.clone();
        in_dependency_order(&context(), &project, &["web".to_string()], move |node| {
            let log = recorder.clone();
            async move {
                log.lock().unwrap().push(node);
                Ok(())
            }
        })
        .await
        .unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["db", "api", "web"]);
    }

    #[smol_potat::test]
    async fn test_walk_runs_independent_branches_concurrently() {
        let project = Project::new("wide")
            .with_service(ServiceNode::new("a"))
            .with_service(ServiceNode::new("b"))
            .with_service(ServiceNode::new("c"));

        let start = std::time::Instant::now();
        in_reverse_dependency_order(&context(), &project, &[], |_| async {
            smol::Timer::after(Duration::from_millis(100)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[smol_potat::test]
    async fn test_walk_failure_skips_dependent_nodes() {
        let project = create_test_project();
        let log = Arc::new(Mutex::new(Vec::new()));

        let recorder = log.clone();
        let result = in_reverse_dependency_order(&context(), &project, &[], move |node| {
            let log = recorder.clone();
            async move {
                log.lock().unwrap().push(node.clone());
                if node == "web" {
                    return Err(Error::Other("web refused to stop".to_string()));
                }
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Other(msg)) if msg == "web refused to stop"));

        let visited = log.lock().unwrap().clone();
        // api (and therefore db) sit behind web
        assert!(!visited.contains(&"api".to_string()));
        assert!(!visited.contains(&"db".to_string()));
        // unrelated branches still ran
        assert!(visited.contains(&"worker".to_string()));
        assert!(visited.contains(&"cache".to_string()));
    }

    #[smol_potat::test]
    async fn test_walk_optional_edge_does_not_block() {
        let project = Project::new("demo")
            .with_service(ServiceNode::new("db"))
            .with_service(ServiceNode::new("web").depends_on("db", false));
        let log = Arc::new(Mutex::new(Vec::new()));

        let recorder = log.clone();
        in_reverse_dependency_order(&context(), &project, &[], move |node| {
            let log = recorder.clone();
            async move {
                if node == "web" {
                    smol::Timer::after(Duration::from_millis(50)).await;
                    log.lock().unwrap().push(node);
                    return Err(Error::Other("web failed".to_string()));
                }
                log.lock().unwrap().push(node);
                Ok(())
            }
        })
        .await
        .unwrap_err();

        // db neither waited for web nor got skipped by its failure
        assert_eq!(log.lock().unwrap().clone(), vec!["db", "web"]);
    }

    #[smol_potat::test]
    async fn test_walk_cycle_fails_without_running_actions() {
        let project = Project::new("circular")
            .with_service(ServiceNode::new("a").depends_on("b", true))
            .with_service(ServiceNode::new("b").depends_on("a", true));
        let calls = Arc::new(Mutex::new(0));

        let counter = calls.clone();
        let result = in_reverse_dependency_order(&context(), &project, &[], move |_| {
            let calls = counter.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::DependencyCycle(_))));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[smol_potat::test]
    async fn test_walk_stops_scheduling_after_cancel() {
        let project = Project::new("demo")
            .with_service(ServiceNode::new("db"))
            .with_service(ServiceNode::new("web").depends_on("db", true));
        let ctx = context();
        let log = Arc::new(Mutex::new(Vec::new()));

        let recorder = log.clone();
        let token = ctx.cancellation().clone();
        let result = in_reverse_dependency_order(&ctx, &project, &[], move |node| {
            let log = recorder.clone();
            let token = token.clone();
            async move {
                log.lock().unwrap().push(node);
                token.cancel();
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(log.lock().unwrap().clone(), vec!["web"]);
    }
}
