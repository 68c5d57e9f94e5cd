// SPDX-License-Identifier: MIT

//! Step loop orchestration
//!
//! The orchestrator drives one run at a time: resolve the current node,
//! execute it through the active [`ExecutionMode`], merge the result into
//! the run's [`StateContainer`], append history, route to the next node(s),
//! repeat until a terminal node, the step budget, a cancellation or an
//! error. All bookkeeping between node executions is synchronous; the only
//! suspension point is inside the node itself.
//!
//! Every orchestrator is handed its dependencies explicitly at
//! construction. There is no ambient registry and no "current run"
//! singleton, so concurrent runs cannot interfere through shared state.

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::graph::{GraphModel, Node};
use crate::hooks::HookSet;
use crate::mode::{self, ExecutionMode};
use crate::node::{NodeExecutionResult, NodeImplementation};
use crate::registry::ComponentRegistry;
use crate::router::Router;
use crate::state::{History, HistoryEntry, HistoryKind, SnapshotStore, StateContainer};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// How parallel branch writes are combined at the join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Later branches (edge declaration order) win on overlapping keys
    #[default]
    LastWriteWins,
    /// Two branches writing different values to the same key fail the run
    FailOnConflict,
}

/// Per-run tuning knobs
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Hard step budget; guarantees termination for cyclic graphs
    pub max_steps: u64,
    /// History ring buffer capacity
    pub history_capacity: usize,
    pub merge_strategy: MergeStrategy,
    /// Save to the checkpoint store every N steps
    pub checkpoint_interval: Option<u64>,
    /// Take an automatic snapshot every N steps
    pub snapshot_interval: Option<u64>,
    /// Deadline expressed as a run duration; implemented as a cancellation
    pub deadline: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            history_capacity: crate::state::history::DEFAULT_HISTORY_CAPACITY,
            merge_strategy: MergeStrategy::default(),
            checkpoint_interval: None,
            snapshot_interval: None,
            deadline: None,
        }
    }
}

/// One element of the streaming run variant
#[derive(Debug, Clone)]
pub struct StepUpdate {
    pub step: u64,
    pub node_id: String,
    pub state: StateContainer,
    pub status: RunStatus,
}

/// The per-run handle: state, history, snapshots and cancellation.
///
/// Exclusively owned by one run; passing state to another run requires an
/// explicit deep copy of the values, never a shared reference.
pub struct RunSession {
    ctx: ExecutionContext,
    state: StateContainer,
    history: History,
    snapshots: SnapshotStore,
    status: RunStatus,
    error: Option<EngineError>,
    cancel: CancellationToken,
    steps: AtomicU64,
    deadline: Option<Instant>,
}

impl RunSession {
    fn new(workflow_id: &str, initial: Map<String, Value>, history_capacity: usize) -> Self {
        Self {
            ctx: ExecutionContext::new(workflow_id),
            state: StateContainer::with_values(initial),
            history: History::new(history_capacity),
            snapshots: SnapshotStore::new(),
            status: RunStatus::Pending,
            error: None,
            cancel: CancellationToken::new(),
            steps: AtomicU64::new(0),
            deadline: None,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn state(&self) -> &StateContainer {
        &self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Token callers may use to cancel the run from outside
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Capture the current values as a named snapshot
    pub fn snapshot(&mut self) -> String {
        self.snapshots.take(&self.state)
    }

    /// Replace the live values with a snapshot's values. History is never
    /// rewritten: the rollback itself becomes a new `Restore` entry.
    pub fn restore(&mut self, snapshot_id: &str) -> Result<(), EngineError> {
        let snapshot = self
            .snapshots
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType {
                kind: "snapshot",
                name: snapshot_id.to_string(),
            })?;
        let revision = self.state.replace(snapshot.values.clone());
        self.history.push(HistoryEntry::new(
            revision,
            format!("restore:{}", snapshot_id),
            HistoryKind::Restore,
            snapshot.values,
        ));
        Ok(())
    }
}

/// Immutable pieces a parallel branch needs from its run
struct BranchContext<'a> {
    ctx: &'a ExecutionContext,
    cancel: &'a CancellationToken,
    steps: &'a AtomicU64,
    deadline: Option<Instant>,
}

/// Drives the step loop for one graph, one mode, one hook set.
#[derive(Clone)]
pub struct Orchestrator {
    graph: Arc<GraphModel>,
    /// Node implementations resolved once at construction, keyed by node id
    resolved: Arc<std::collections::HashMap<String, Arc<dyn NodeImplementation>>>,
    router: Arc<Router>,
    hooks: HookSet,
    mode: ExecutionMode,
    config: RunConfig,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
}

impl Orchestrator {
    /// Resolve every node type and named guard up front; registry misuse
    /// fails here, not mid-run.
    pub fn new(
        graph: Arc<GraphModel>,
        registry: &ComponentRegistry,
        mode: ExecutionMode,
    ) -> Result<Self, EngineError> {
        let mut resolved = std::collections::HashMap::new();
        for node in graph.nodes() {
            resolved.insert(node.id.clone(), registry.nodes.resolve(&node.type_name)?);
        }

        let router = Router::new(graph.clone(), &registry.guards)?;

        Ok(Self {
            graph,
            resolved: Arc::new(resolved),
            router: Arc::new(router),
            hooks: HookSet::new(),
            mode,
            config: RunConfig::default(),
            checkpoint: None,
        })
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    /// Create a fresh run session seeded with initial values
    pub fn session(&self, initial: Map<String, Value>) -> RunSession {
        RunSession::new(&self.graph.name, initial, self.config.history_capacity)
    }

    /// Blocking run. Only `Sync` and `Hybrid` modes may drive it.
    pub fn run(&self, session: &mut RunSession) -> Result<RunStatus, EngineError> {
        if !self.mode.supports_blocking_loop() {
            return Err(EngineError::mode_mismatch(
                "<run>",
                format!("{} mode cannot drive the blocking run entry point", self.mode),
            ));
        }
        Ok(self.drive_blocking(session))
    }

    /// Suspending run. Only `Async` and `Hybrid` modes may drive it.
    pub async fn run_async(&self, session: &mut RunSession) -> Result<RunStatus, EngineError> {
        if !self.mode.supports_suspending_loop() {
            return Err(EngineError::mode_mismatch(
                "<run>",
                format!(
                    "{} mode cannot drive the suspending run entry point",
                    self.mode
                ),
            ));
        }
        Ok(self.drive_suspending(session, None).await)
    }

    /// Streaming run: a finite, non-restartable sequence of per-step
    /// updates, ending with one update carrying the terminal status. The
    /// session is consumed; a new stream means a new run.
    pub fn run_stream(
        &self,
        session: RunSession,
    ) -> Result<ReceiverStream<StepUpdate>, EngineError> {
        if !self.mode.supports_suspending_loop() {
            return Err(EngineError::mode_mismatch(
                "<run>",
                format!("{} mode cannot drive the streaming run entry point", self.mode),
            ));
        }

        let (tx, rx) = mpsc::channel(16);
        let orchestrator = self.clone();
        let mut session = session;
        tokio::spawn(async move {
            let status = orchestrator.drive_suspending(&mut session, Some(&tx)).await;
            let final_update = StepUpdate {
                step: session.steps_taken(),
                node_id: String::new(),
                state: session.state.clone(),
                status,
            };
            let _ = tx.send(final_update).await;
        });
        Ok(ReceiverStream::new(rx))
    }

    // --- blocking loop -----------------------------------------------------

    fn drive_blocking(&self, session: &mut RunSession) -> RunStatus {
        if let Err(e) = self.begin(session) {
            return self.finish_error(session, e);
        }

        let mut queue = VecDeque::from([self.graph.entry_point().to_string()]);
        while let Some(node_id) = queue.pop_front() {
            if self.cancel_requested(session) {
                return self.finish_cancelled(session, &node_id);
            }
            match self.step_blocking(session, &node_id) {
                Ok(next) => queue.extend(next),
                Err(e) => return self.finish_error(session, e),
            }
        }

        self.finish_completed(session)
    }

    fn step_blocking(
        &self,
        session: &mut RunSession,
        node_id: &str,
    ) -> Result<Vec<String>, EngineError> {
        self.charge_step(&session.steps, node_id)?;
        let (node, implementation) = self.lookup(node_id)?;

        if !self.hooks.before_node(&node, &session.state, &session.ctx)? {
            self.record_skip(session, &node.id);
            return self.router.resolve_next(node_id, &session.state);
        }

        let result = {
            let probe = RunProbe {
                state: &session.state,
                ctx: &session.ctx,
            };
            self.execute_blocking_with_retry(implementation.as_ref(), &node, &probe)?
        };
        if session.cancel.is_cancelled() {
            // Blocking work cannot be preempted; the result is discarded
            return Err(EngineError::Cancelled {
                node_id: node.id.clone(),
            });
        }

        self.apply_result(session, &node, &result)?;
        self.maybe_persist(session);

        let next = self.next_nodes(session, &node, &result)?;
        if next.len() > 1 && node.parallel {
            self.join_parallel_blocking(session, &node.id, &next)?;
            return Ok(Vec::new());
        }
        Ok(next)
    }

    fn join_parallel_blocking(
        &self,
        session: &mut RunSession,
        origin: &str,
        targets: &[String],
    ) -> Result<(), EngineError> {
        let branch_ctx = BranchContext {
            ctx: &session.ctx,
            cancel: &session.cancel,
            steps: &session.steps,
            deadline: session.deadline,
        };
        let mut branches = Vec::with_capacity(targets.len());
        for target in targets {
            branches.push(self.run_branch_blocking(
                &branch_ctx,
                target,
                session.state.clone(),
            )?);
        }

        let merged = merge_branches(
            self.config.merge_strategy,
            origin,
            &mut session.state,
            branches,
        )?;
        for entry in merged {
            session.history.push(entry);
        }
        Ok(())
    }

    /// Run one isolated branch to its terminal node, returning its history.
    fn run_branch_blocking(
        &self,
        branch: &BranchContext<'_>,
        start: &str,
        mut state: StateContainer,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        let mut entries = Vec::new();
        let mut queue = VecDeque::from([start.to_string()]);

        while let Some(node_id) = queue.pop_front() {
            if branch.cancel.is_cancelled() {
                return Err(EngineError::Cancelled { node_id });
            }
            self.charge_step(branch.steps, &node_id)?;
            let (node, implementation) = self.lookup(&node_id)?;

            if !self.hooks.before_node(&node, &state, branch.ctx)? {
                entries.push(HistoryEntry::new(
                    state.revision(),
                    &node.id,
                    HistoryKind::Skipped,
                    Map::new(),
                ));
                queue.extend(self.router.resolve_next(&node_id, &state)?);
                continue;
            }

            let result = {
                let probe = RunProbe {
                    state: &state,
                    ctx: branch.ctx,
                };
                self.execute_blocking_with_retry(implementation.as_ref(), &node, &probe)?
            };

            apply_result_to(
                &self.hooks,
                &node,
                &result,
                branch.ctx,
                &mut state,
                &mut entries,
            )?;

            let next = match &result.explicit_next {
                Some(ids) => ids.clone(),
                None => self.router.resolve_next(&node_id, &state)?,
            };
            if next.len() > 1 && node.parallel {
                let sub = {
                    let mut subs = Vec::with_capacity(next.len());
                    for target in &next {
                        subs.push(self.run_branch_blocking(branch, target, state.clone())?);
                    }
                    subs
                };
                let merged = merge_branches(
                    self.config.merge_strategy,
                    &node.id,
                    &mut state,
                    sub,
                )?;
                entries.extend(merged);
            } else {
                queue.extend(next);
            }
        }

        Ok(entries)
    }

    fn execute_blocking_with_retry(
        &self,
        implementation: &dyn NodeImplementation,
        node: &Node,
        probe: &RunProbe<'_>,
    ) -> Result<NodeExecutionResult, EngineError> {
        let policy = implementation.retry_policy();
        let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match mode::run_node_blocking(self.mode, implementation, node, probe.state, probe.ctx)
            {
                Ok(result) => return Ok(result),
                Err(e @ EngineError::ModeMismatch { .. }) => return Err(e),
                Err(e) if attempt < max_attempts => {
                    let delay = policy
                        .map(|p| p.delay_before(attempt))
                        .unwrap_or(Duration::ZERO);
                    log::warn!(
                        "Node '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        node.id,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- suspending loop ---------------------------------------------------

    async fn drive_suspending(
        &self,
        session: &mut RunSession,
        tx: Option<&mpsc::Sender<StepUpdate>>,
    ) -> RunStatus {
        if let Err(e) = self.begin(session) {
            return self.finish_error(session, e);
        }

        let mut queue = VecDeque::from([self.graph.entry_point().to_string()]);
        while let Some(node_id) = queue.pop_front() {
            if self.cancel_requested(session) {
                return self.finish_cancelled(session, &node_id);
            }
            match self.step_suspending(session, &node_id).await {
                Ok(next) => queue.extend(next),
                Err(e) => return self.finish_error(session, e),
            }

            // Yield point for the streaming variant
            if let Some(tx) = tx {
                let update = StepUpdate {
                    step: session.steps_taken(),
                    node_id: node_id.clone(),
                    state: session.state.clone(),
                    status: RunStatus::Running,
                };
                if tx.send(update).await.is_err() {
                    // Consumer went away; treat as cancellation
                    session.cancel.cancel();
                }
            }
        }

        self.finish_completed(session)
    }

    async fn step_suspending(
        &self,
        session: &mut RunSession,
        node_id: &str,
    ) -> Result<Vec<String>, EngineError> {
        self.charge_step(&session.steps, node_id)?;
        let (node, implementation) = self.lookup(node_id)?;

        if !self.hooks.before_node(&node, &session.state, &session.ctx)? {
            self.record_skip(session, &node.id);
            return self.router.resolve_next(node_id, &session.state);
        }

        let result = {
            let probe = RunProbe {
                state: &session.state,
                ctx: &session.ctx,
            };
            self.execute_suspending_with_retry(
                implementation.as_ref(),
                &node,
                &probe,
                &session.cancel,
                session.deadline,
            )
            .await?
        };

        self.apply_result(session, &node, &result)?;
        self.maybe_persist(session);

        let next = self.next_nodes(session, &node, &result)?;
        if next.len() > 1 && node.parallel {
            self.join_parallel_suspending(session, &node.id, &next).await?;
            return Ok(Vec::new());
        }
        Ok(next)
    }

    async fn execute_suspending_with_retry(
        &self,
        implementation: &dyn NodeImplementation,
        node: &Node,
        probe: &RunProbe<'_>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<NodeExecutionResult, EngineError> {
        let policy = implementation.retry_policy();
        let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            log::debug!("Executing node '{}' (attempt {})", node.id, attempt);

            let outcome = tokio::select! {
                result = mode::run_node_suspending(
                    self.mode,
                    implementation,
                    node,
                    probe.state,
                    probe.ctx,
                ) => result,
                () = cancel.cancelled() => Err(EngineError::Cancelled {
                    node_id: node.id.clone(),
                }),
                () = until_deadline(deadline) => {
                    cancel.cancel();
                    Err(EngineError::Cancelled { node_id: node.id.clone() })
                }
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e @ EngineError::ModeMismatch { .. }) => return Err(e),
                Err(e @ EngineError::Cancelled { .. }) => return Err(e),
                Err(e) if attempt < max_attempts => {
                    let delay = policy
                        .map(|p| p.delay_before(attempt))
                        .unwrap_or(Duration::ZERO);
                    log::warn!(
                        "Node '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        node.id,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn join_parallel_suspending(
        &self,
        session: &mut RunSession,
        origin: &str,
        targets: &[String],
    ) -> Result<(), EngineError> {
        let results = {
            let branch_ctx = BranchContext {
                ctx: &session.ctx,
                cancel: &session.cancel,
                steps: &session.steps,
                deadline: session.deadline,
            };
            let futures: Vec<_> = targets
                .iter()
                .map(|target| {
                    self.run_branch_suspending(&branch_ctx, target.clone(), session.state.clone())
                })
                .collect();
            // Counting barrier: the join waits for every branch
            join_all(futures).await
        };

        let mut branches = Vec::with_capacity(results.len());
        for result in results {
            branches.push(result?);
        }

        let merged = merge_branches(
            self.config.merge_strategy,
            origin,
            &mut session.state,
            branches,
        )?;
        for entry in merged {
            session.history.push(entry);
        }
        Ok(())
    }

    /// Run one isolated branch to its terminal node. Boxed for recursion
    /// (branches may themselves fan out).
    fn run_branch_suspending<'a>(
        &'a self,
        branch: &'a BranchContext<'a>,
        start: String,
        mut state: StateContainer,
    ) -> BoxFuture<'a, Result<Vec<HistoryEntry>, EngineError>> {
        async move {
            let mut entries = Vec::new();
            let mut queue = VecDeque::from([start]);

            while let Some(node_id) = queue.pop_front() {
                if branch.cancel.is_cancelled() {
                    return Err(EngineError::Cancelled { node_id });
                }
                self.charge_step(branch.steps, &node_id)?;
                let (node, implementation) = self.lookup(&node_id)?;

                if !self.hooks.before_node(&node, &state, branch.ctx)? {
                    entries.push(HistoryEntry::new(
                        state.revision(),
                        &node.id,
                        HistoryKind::Skipped,
                        Map::new(),
                    ));
                    queue.extend(self.router.resolve_next(&node_id, &state)?);
                    continue;
                }

                let result = {
                    let probe = RunProbe {
                        state: &state,
                        ctx: branch.ctx,
                    };
                    self.execute_suspending_with_retry(
                        implementation.as_ref(),
                        &node,
                        &probe,
                        branch.cancel,
                        branch.deadline,
                    )
                    .await?
                };

                apply_result_to(
                    &self.hooks,
                    &node,
                    &result,
                    branch.ctx,
                    &mut state,
                    &mut entries,
                )?;

                let next = match &result.explicit_next {
                    Some(ids) => ids.clone(),
                    None => self.router.resolve_next(&node_id, &state)?,
                };
                if next.len() > 1 && node.parallel {
                    let futures: Vec<_> = next
                        .iter()
                        .map(|target| {
                            self.run_branch_suspending(branch, target.clone(), state.clone())
                        })
                        .collect();
                    let results = join_all(futures).await;
                    let mut subs = Vec::with_capacity(results.len());
                    for result in results {
                        subs.push(result?);
                    }
                    let merged = merge_branches(
                        self.config.merge_strategy,
                        &node.id,
                        &mut state,
                        subs,
                    )?;
                    entries.extend(merged);
                } else {
                    queue.extend(next);
                }
            }

            Ok(entries)
        }
        .boxed()
    }

    // --- shared bookkeeping (always synchronous) ---------------------------

    fn begin(&self, session: &mut RunSession) -> Result<(), EngineError> {
        session.status = RunStatus::Running;
        session.deadline = self.config.deadline.map(|d| Instant::now() + d);
        log::info!(
            "Starting run {} of graph '{}' in {} mode",
            session.ctx.execution_id,
            self.graph.name,
            self.mode
        );
        self.hooks.run_start(&session.ctx)
    }

    fn lookup(&self, node_id: &str) -> Result<(Node, Arc<dyn NodeImplementation>), EngineError> {
        let node = self
            .graph
            .node(node_id)
            .cloned()
            .ok_or_else(|| EngineError::node(node_id, "node id not in graph"))?;
        let implementation = self
            .resolved
            .get(node_id)
            .cloned()
            .ok_or_else(|| EngineError::node(node_id, "node implementation not resolved"))?;
        Ok((node, implementation))
    }

    fn charge_step(&self, steps: &AtomicU64, node_id: &str) -> Result<(), EngineError> {
        let step = steps.fetch_add(1, Ordering::SeqCst) + 1;
        if step > self.config.max_steps {
            return Err(EngineError::StepLimitExceeded {
                limit: self.config.max_steps,
                node_id: node_id.to_string(),
            });
        }
        Ok(())
    }

    fn cancel_requested(&self, session: &RunSession) -> bool {
        if let Some(deadline) = session.deadline {
            if Instant::now() >= deadline {
                session.cancel.cancel();
            }
        }
        session.cancel.is_cancelled()
    }

    fn record_skip(&self, session: &mut RunSession, node_id: &str) {
        log::info!("Node '{}' skipped by trigger veto", node_id);
        session.history.push(HistoryEntry::new(
            session.state.revision(),
            node_id,
            HistoryKind::Skipped,
            Map::new(),
        ));
    }

    fn apply_result(
        &self,
        session: &mut RunSession,
        node: &Node,
        result: &NodeExecutionResult,
    ) -> Result<(), EngineError> {
        apply_result_to(
            &self.hooks,
            node,
            result,
            &session.ctx,
            &mut session.state,
            &mut SessionSink(&mut session.history),
        )
    }

    fn next_nodes(
        &self,
        session: &RunSession,
        node: &Node,
        result: &NodeExecutionResult,
    ) -> Result<Vec<String>, EngineError> {
        match &result.explicit_next {
            Some(ids) => Ok(ids.clone()),
            None => self.router.resolve_next(&node.id, &session.state),
        }
    }

    fn maybe_persist(&self, session: &mut RunSession) {
        let step = session.steps_taken();
        if let Some(interval) = self.config.snapshot_interval {
            if interval > 0 && step % interval == 0 {
                let id = session.snapshot();
                log::debug!("Automatic snapshot {} at step {}", id, step);
            }
        }
        if let (Some(interval), Some(store)) = (self.config.checkpoint_interval, &self.checkpoint)
        {
            if interval > 0 && step % interval == 0 {
                if let Err(e) =
                    store.save(&session.ctx.execution_id, &session.state, &session.history)
                {
                    // Never fatal to the run
                    log::warn!("Checkpoint save failed at step {}: {}", step, e);
                }
            }
        }
    }

    fn finish_completed(&self, session: &mut RunSession) -> RunStatus {
        if session.status == RunStatus::Running {
            session.status = RunStatus::Completed;
        }
        log::info!(
            "Run {} finished: {:?} after {} steps",
            session.ctx.execution_id,
            session.status,
            session.steps_taken()
        );
        self.hooks.run_end(&session.ctx, &session.state);
        session.status
    }

    fn finish_error(&self, session: &mut RunSession, error: EngineError) -> RunStatus {
        if matches!(error, EngineError::Cancelled { .. }) {
            session.status = RunStatus::Cancelled;
        } else {
            log::error!(
                "Run {} failed: {}",
                session.ctx.execution_id,
                error
            );
            self.hooks.run_error(&session.ctx, &error);
            session.status = RunStatus::Failed;
        }
        session.error = Some(error);
        self.hooks.run_end(&session.ctx, &session.state);
        session.status
    }

    fn finish_cancelled(&self, session: &mut RunSession, node_id: &str) -> RunStatus {
        session.status = RunStatus::Cancelled;
        session.error = Some(EngineError::Cancelled {
            node_id: node_id.to_string(),
        });
        log::info!(
            "Run {} cancelled before node '{}'",
            session.ctx.execution_id,
            node_id
        );
        self.hooks.run_end(&session.ctx, &session.state);
        session.status
    }
}

/// Read-only view of state+context handed to node executions
struct RunProbe<'a> {
    state: &'a StateContainer,
    ctx: &'a ExecutionContext,
}

/// Where history entries land: a session's ring buffer or a branch's local vec
trait EntrySink {
    fn push(&mut self, entry: HistoryEntry);
}

struct SessionSink<'a>(&'a mut History);

impl EntrySink for SessionSink<'_> {
    fn push(&mut self, entry: HistoryEntry) {
        self.0.push(entry);
    }
}

impl EntrySink for Vec<HistoryEntry> {
    fn push(&mut self, entry: HistoryEntry) {
        Vec::push(self, entry);
    }
}

/// Merge a node result into state, record the step, then run `after`
/// triggers and apply any amendments as their own history entries. One
/// step's merge is atomic with respect to history: the entry carries
/// exactly the delta that was applied.
fn apply_result_to(
    hooks: &HookSet,
    node: &Node,
    result: &NodeExecutionResult,
    ctx: &ExecutionContext,
    state: &mut StateContainer,
    sink: &mut impl EntrySink,
) -> Result<(), EngineError> {
    let revision = state.apply(&result.updates);
    sink.push(HistoryEntry::new(
        revision,
        &node.id,
        HistoryKind::Step,
        result.updates.clone(),
    ));

    for amendment in hooks.after_node(node, state, result, ctx)? {
        let revision = state.apply(&amendment.delta);
        sink.push(HistoryEntry::new(
            revision,
            format!("hook:{}", amendment.hook_name),
            HistoryKind::Amendment,
            amendment.delta,
        ));
    }
    Ok(())
}

/// Apply branch histories to the joined state in branch order and renumber
/// their revisions into the main sequence, so replay stays exact.
fn merge_branches(
    strategy: MergeStrategy,
    origin: &str,
    state: &mut StateContainer,
    branches: Vec<Vec<HistoryEntry>>,
) -> Result<Vec<HistoryEntry>, EngineError> {
    if strategy == MergeStrategy::FailOnConflict {
        let mut writes: std::collections::HashMap<&str, (usize, &Value)> =
            std::collections::HashMap::new();
        for (index, branch) in branches.iter().enumerate() {
            for entry in branch {
                for (key, value) in &entry.delta {
                    if let Some((other, previous)) = writes.get(key.as_str()) {
                        if *other != index && *previous != value {
                            return Err(EngineError::MergeConflict {
                                node_id: origin.to_string(),
                                key: key.clone(),
                            });
                        }
                    }
                    writes.insert(key.as_str(), (index, value));
                }
            }
        }
    }

    let mut merged = Vec::new();
    for branch in branches {
        for entry in branch {
            let revision = if entry.delta.is_empty() {
                state.revision()
            } else {
                state.apply(&entry.delta)
            };
            merged.push(HistoryEntry {
                revision,
                ..entry
            });
        }
    }
    Ok(merged)
}

/// Pends forever when there is no deadline
async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeDescriptor, GraphDescriptor, NodeDescriptor};
    use crate::node::ExecutionCapability;
    use async_trait::async_trait;
    use serde_json::json;

    /// Sync node that increments a counter key
    struct Increment {
        key: String,
    }

    #[async_trait]
    impl NodeImplementation for Increment {
        fn capability(&self) -> ExecutionCapability {
            ExecutionCapability::Sync
        }

        fn run_sync(
            &self,
            _node: &Node,
            state: &StateContainer,
            _ctx: &ExecutionContext,
        ) -> Result<NodeExecutionResult, EngineError> {
            let current = state.get(&self.key).and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(NodeExecutionResult::empty().with_update(&self.key, json!(current + 1)))
        }
    }

    struct Noop;

    #[async_trait]
    impl NodeImplementation for Noop {
        fn capability(&self) -> ExecutionCapability {
            ExecutionCapability::Both
        }

        fn run_sync(
            &self,
            _node: &Node,
            _state: &StateContainer,
            _ctx: &ExecutionContext,
        ) -> Result<NodeExecutionResult, EngineError> {
            Ok(NodeExecutionResult::empty())
        }

        async fn run_async(
            &self,
            _node: &Node,
            _state: &StateContainer,
            _ctx: &ExecutionContext,
        ) -> Result<NodeExecutionResult, EngineError> {
            Ok(NodeExecutionResult::empty())
        }
    }

    fn node(id: &str, type_name: &str) -> NodeDescriptor {
        NodeDescriptor {
            id: id.to_string(),
            type_name: type_name.to_string(),
            config: Map::new(),
            terminal: false,
            parallel: false,
        }
    }

    fn edge(from: &str, to: &str, when: Option<&str>) -> EdgeDescriptor {
        EdgeDescriptor {
            from: from.to_string(),
            to: to.to_string(),
            when: when.map(|s| s.to_string()),
            guard: None,
        }
    }

    fn counting_registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .nodes
            .register(
                "increment",
                Arc::new(Increment {
                    key: "count".to_string(),
                }),
            )
            .unwrap();
        registry.nodes.register("noop", Arc::new(Noop)).unwrap();
        registry
    }

    /// Iterative workflow: A -> B, B -> C when count >= 3, B -> B when
    /// count < 3, B increments count per visit.
    fn loop_graph() -> Arc<GraphModel> {
        let a = node("a", "noop");
        let b = node("b", "increment");
        let mut c = node("c", "noop");
        c.terminal = true;

        Arc::new(
            GraphModel::build(&GraphDescriptor {
                name: "loop".to_string(),
                description: String::new(),
                entry_point: "a".to_string(),
                nodes: vec![a, b, c],
                edges: vec![
                    edge("a", "b", None),
                    edge("b", "c", Some("count >= 3")),
                    edge("b", "b", Some("count < 3")),
                ],
            })
            .unwrap(),
        )
    }

    fn initial_count(count: i64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("count".to_string(), json!(count));
        map
    }

    #[test]
    fn test_loop_until_guard_flips() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync).unwrap();

        let mut session = orchestrator.session(initial_count(0));
        let status = orchestrator.run(&mut session).unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(session.state().get("count"), Some(&json!(3)));
        let visited: Vec<&str> = session
            .history()
            .iter()
            .map(|e| e.node_id.as_str())
            .collect();
        assert_eq!(visited, vec!["a", "b", "b", "b", "c"]);
        assert_eq!(session.steps_taken(), 5);
    }

    #[test]
    fn test_history_replay_matches_final_state() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync).unwrap();

        let initial = initial_count(0);
        let mut session = orchestrator.session(initial.clone());
        orchestrator.run(&mut session).unwrap();

        let replayed = session.history().replay(&initial);
        assert_eq!(&replayed, session.state().values());
    }

    #[test]
    fn test_step_limit_fails_run_and_keeps_history() {
        let registry = counting_registry();
        // Guard never flips: count never reaches 100
        let graph = Arc::new(
            GraphModel::build(&GraphDescriptor {
                name: "forever".to_string(),
                description: String::new(),
                entry_point: "b".to_string(),
                nodes: vec![node("b", "increment")],
                edges: vec![edge("b", "b", Some("count < 100"))],
            })
            .unwrap(),
        );
        let orchestrator = Orchestrator::new(graph, &registry, ExecutionMode::Sync)
            .unwrap()
            .with_config(RunConfig {
                max_steps: 10,
                ..RunConfig::default()
            });

        let mut session = orchestrator.session(initial_count(0));
        let status = orchestrator.run(&mut session).unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert!(matches!(
            session.error(),
            Some(EngineError::StepLimitExceeded { limit: 10, .. })
        ));
        assert_eq!(session.history().len(), 10);
    }

    #[test]
    fn test_async_mode_rejected_by_blocking_run() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Async).unwrap();
        let mut session = orchestrator.session(initial_count(0));
        let err = orchestrator.run(&mut session).unwrap_err();
        assert!(matches!(err, EngineError::ModeMismatch { .. }));
        // Nothing ran
        assert_eq!(session.steps_taken(), 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_async_run_of_hybrid_graph() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Hybrid).unwrap();
        let mut session = orchestrator.session(initial_count(0));
        let status = orchestrator.run_async(&mut session).await.unwrap();
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(session.state().get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_unknown_node_type_fails_at_construction() {
        let registry = ComponentRegistry::new();
        let Err(err) = Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync) else {
            panic!("construction succeeded with an empty registry")
        };
        assert!(matches!(err, EngineError::UnknownType { .. }));
    }

    #[test]
    fn test_snapshot_restore_roundtrip_is_noop_plus_one_entry() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync).unwrap();
        let mut session = orchestrator.session(initial_count(7));

        let before = session.state().values().clone();
        let history_before = session.history().len();

        let id = session.snapshot();
        session.restore(&id).unwrap();

        assert_eq!(session.state().values(), &before);
        assert_eq!(session.history().len(), history_before + 1);
        let entry = session.history().last().unwrap();
        assert_eq!(entry.kind, HistoryKind::Restore);
        assert!(entry.node_id.starts_with("restore:"));
    }

    #[test]
    fn test_restore_unknown_snapshot() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync).unwrap();
        let mut session = orchestrator.session(Map::new());
        let err = session.restore("missing").unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownType {
                kind: "snapshot",
                ..
            }
        ));
    }

    #[test]
    fn test_checkpoint_interval_saves() {
        use crate::checkpoint::InMemoryCheckpointStore;

        let registry = counting_registry();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync)
            .unwrap()
            .with_checkpoint_store(store.clone())
            .with_config(RunConfig {
                checkpoint_interval: Some(2),
                ..RunConfig::default()
            });

        let mut session = orchestrator.session(initial_count(0));
        orchestrator.run(&mut session).unwrap();

        let (state, _) = store
            .load(&session.context().execution_id)
            .unwrap()
            .expect("checkpoint saved");
        // Last save happened at step 4 of 5 (b's third visit)
        assert!(state.get("count").is_some());
    }

    #[test]
    fn test_snapshot_interval_takes_automatic_snapshots() {
        let registry = counting_registry();
        let orchestrator = Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync)
            .unwrap()
            .with_config(RunConfig {
                snapshot_interval: Some(2),
                ..RunConfig::default()
            });

        let mut session = orchestrator.session(initial_count(0));
        orchestrator.run(&mut session).unwrap();

        // 5 steps at an interval of 2: snapshots at steps 2 and 4
        assert_eq!(session.snapshots().len(), 2);
    }

    #[test]
    fn test_merge_branches_last_write_wins() {
        let mut state = StateContainer::empty();
        let branch_one = vec![HistoryEntry::new(1, "g", HistoryKind::Step, {
            let mut d = Map::new();
            d.insert("left".to_string(), json!("g"));
            d.insert("shared".to_string(), json!("from-g"));
            d
        })];
        let branch_two = vec![HistoryEntry::new(1, "h", HistoryKind::Step, {
            let mut d = Map::new();
            d.insert("right".to_string(), json!("h"));
            d.insert("shared".to_string(), json!("from-h"));
            d
        })];

        let merged = merge_branches(
            MergeStrategy::LastWriteWins,
            "f",
            &mut state,
            vec![branch_one, branch_two],
        )
        .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(state.get("left"), Some(&json!("g")));
        assert_eq!(state.get("right"), Some(&json!("h")));
        // Later branch wins the overlapping key
        assert_eq!(state.get("shared"), Some(&json!("from-h")));
        // Revisions renumbered into the main sequence
        assert_eq!(merged[0].revision, 1);
        assert_eq!(merged[1].revision, 2);
    }

    #[test]
    fn test_merge_branches_fail_on_conflict() {
        let mut state = StateContainer::empty();
        let mk = |node: &str, value: &str| {
            vec![HistoryEntry::new(1, node, HistoryKind::Step, {
                let mut d = Map::new();
                d.insert("shared".to_string(), json!(value));
                d
            })]
        };

        let err = merge_branches(
            MergeStrategy::FailOnConflict,
            "f",
            &mut state,
            vec![mk("g", "one"), mk("h", "two")],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MergeConflict { .. }));

        // Identical writes are not a conflict
        let merged = merge_branches(
            MergeStrategy::FailOnConflict,
            "f",
            &mut StateContainer::empty(),
            vec![mk("g", "same"), mk("h", "same")],
        );
        assert!(merged.is_ok());
    }

    #[test]
    fn test_cancellation_before_step() {
        let registry = counting_registry();
        let orchestrator =
            Orchestrator::new(loop_graph(), &registry, ExecutionMode::Sync).unwrap();
        let mut session = orchestrator.session(initial_count(0));
        session.cancel_token().cancel();

        let status = orchestrator.run(&mut session).unwrap();
        assert_eq!(status, RunStatus::Cancelled);
        assert!(session.history().is_empty());
    }
}
