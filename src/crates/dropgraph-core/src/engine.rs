//! The execution engine: fires application drops and propagates completion
//! and error status across the graph.
//!
//! Data-driven apps (`ExecutionMode::Drop`) are subscribed to their input
//! drops' `Status` topic at [`Engine::start`] and fire the moment every
//! input reaches `COMPLETED`. Externally-driven apps (`ExecutionMode::
//! External`) never get a subscription; a driver calls [`Engine::trigger`]
//! explicitly. Either way, firing goes through [`AppDrop::try_claim_fire`]
//! so a barrier app with several inputs completing near-simultaneously
//! still runs exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::drop::{AppKind, DropKind};
use crate::error::{DropError, Result};
use crate::events::{DropEvent, Topic};
use crate::graph::{DropGraph, NodeIndex};
use crate::ids::Oid;
use crate::status::{DropStatus, ExecStatus, ExecutionMode};

/// Runs one application drop's user code against its wired inputs/outputs.
/// The dynamic-library adapter and the in-process composite test doubles
/// both implement this.
#[async_trait]
pub trait AppExecutor: Send + Sync {
    /// Run a barrier app to completion. The engine calls `app.start()`
    /// before this and `app.finish()` / output `setCompleted()` after it
    /// returns `Ok`, so the executor only needs to move bytes.
    async fn execute(&self, graph: &DropGraph, app_idx: NodeIndex) -> Result<()>;

    /// Drive a streaming app for the lifetime of its run. Unlike
    /// [`execute`], the engine does not call `start`/`finish` around this —
    /// per the data model, streaming apps emit `RUNNING`/`FINISHED`
    /// themselves (the native-library adapter's `running()`/`done()`
    /// callbacks are the concrete instance of this). The default
    /// implementation falls back to [`execute`] with the engine driving
    /// start/finish as if it were a barrier app, which is enough for test
    /// doubles and executors that don't distinguish the two app kinds.
    async fn execute_streaming(&self, graph: &DropGraph, app_idx: NodeIndex) -> Result<()> {
        let node = graph.node(app_idx);
        let app = node.as_app().expect("execute_streaming only called on app nodes");
        app.start(node.oid.as_str())?;
        self.execute(graph, app_idx).await?;
        app.finish(node.oid.as_str())?;
        Ok(())
    }
}

/// Notified whenever an app drop transitions to `ERROR`. A listener that
/// panics or itself errors is logged and otherwise ignored — a failing
/// listener must never block or corrupt status propagation for the rest of
/// the graph.
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, oid: &Oid, error: &DropError);
}

/// How app execution is scheduled once an app is ready to fire.
#[derive(Clone)]
pub enum Concurrency {
    /// Run on the caller's task, useful for deterministic tests.
    Inline,
    /// Spawn on the Tokio runtime, bounded by a semaphore of this many
    /// concurrently-running apps.
    Bounded(usize),
}

/// Drives execution of one session's [`DropGraph`].
pub struct Engine {
    graph: Arc<DropGraph>,
    executor: Arc<dyn AppExecutor>,
    concurrency: Concurrency,
    semaphore: Option<Arc<Semaphore>>,
    error_listeners: RwLock<Vec<Arc<dyn ErrorListener>>>,
}

impl Engine {
    pub fn new(graph: Arc<DropGraph>, executor: Arc<dyn AppExecutor>, concurrency: Concurrency) -> Arc<Self> {
        let semaphore = match &concurrency {
            Concurrency::Inline => None,
            Concurrency::Bounded(n) => Some(Arc::new(Semaphore::new(*n))),
        };
        Arc::new(Self {
            graph,
            executor,
            concurrency,
            semaphore,
            error_listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn add_error_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.error_listeners.write().push(listener);
    }

    /// Subscribe every data-driven app to its inputs and fire any app that
    /// has no inputs at all (a pure source app). Call once per session,
    /// after the graph has been built and before any drop is written to.
    pub fn start(self: &Arc<Self>) {
        for (idx, node) in self.graph.iter() {
            let DropKind::App(app_kind) = node.kind() else { continue };
            if node.execution_mode != ExecutionMode::Drop {
                continue;
            }
            if app_kind == AppKind::Streaming {
                // Streaming apps don't wait for a barrier: they run for the
                // duration of the session, consuming chunks as upstream
                // writes arrive. Firing still goes through the one-shot
                // latch so `start` is safe to call only once per deploy.
                self.clone().spawn_fire_streaming(idx);
                continue;
            }
            let inputs = node.edges.read().inputs.clone();
            if inputs.is_empty() {
                self.clone().spawn_fire(idx);
                continue;
            }
            for input_idx in inputs {
                let this = self.clone();
                let input_node = self.graph.node(input_idx).clone();
                input_node.events.subscribe(
                    Topic::Status,
                    Arc::new(move |event: &DropEvent| {
                        if event.new_status == Some(DropStatus::Completed) {
                            this.clone().try_fire_if_ready(idx);
                        }
                    }),
                );
            }
            // Inputs pre-marked COMPLETED before `start` (e.g. stitched
            // in from another node) never emit the event a subscriber
            // would react to, so check readiness once up front too.
            self.clone().try_fire_if_ready(idx);
        }
    }

    /// Record one externally-driven trigger call for an `ExecutionMode::
    /// External` app. The engine never re-derives readiness from input
    /// status for these apps — it counts `trigger` calls and fires once the
    /// count reaches the app's input arity, trusting the driver to call
    /// once per input completion it has observed.
    pub fn trigger(self: &Arc<Self>, oid: &Oid) -> Result<()> {
        let idx = self
            .graph
            .index_of(oid)
            .ok_or_else(|| DropError::invalid_state(oid.to_string(), "no such drop"))?;
        let node = self.graph.node(idx);
        if node.execution_mode != ExecutionMode::External {
            return Err(DropError::invalid_state(oid.to_string(), "app is not externally driven"));
        }
        let app = node.as_app().ok_or_else(|| DropError::invalid_state(oid.to_string(), "not an app drop"))?;
        let n_inputs = node.edges.read().inputs.len();
        let count = app.record_trigger();
        if count < n_inputs {
            return Ok(());
        }
        self.clone().spawn_fire(idx);
        Ok(())
    }

    fn inputs_ready(&self, app_idx: NodeIndex) -> bool {
        let edges = self.graph.node(app_idx).edges.read();
        edges.inputs.iter().all(|&input_idx| {
            self.graph
                .node(input_idx)
                .as_data()
                .map(|d| d.status() == DropStatus::Completed)
                .unwrap_or(false)
        })
    }

    fn try_fire_if_ready(self: Arc<Self>, app_idx: NodeIndex) {
        if self.inputs_ready(app_idx) {
            self.spawn_fire(app_idx);
        }
    }

    fn spawn_fire(self: Arc<Self>, app_idx: NodeIndex) {
        let app = match self.graph.node(app_idx).as_app() {
            Some(a) => a,
            None => return,
        };
        if !app.try_claim_fire() {
            return;
        }
        match self.concurrency {
            Concurrency::Inline => {
                tokio::spawn(async move {
                    self.run_app(app_idx).await;
                });
            }
            Concurrency::Bounded(_) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let permit = this
                        .semaphore
                        .clone()
                        .expect("bounded concurrency always has a semaphore")
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed while the engine is alive");
                    this.run_app(app_idx).await;
                    drop(permit);
                });
            }
        }
    }

    fn spawn_fire_streaming(self: Arc<Self>, app_idx: NodeIndex) {
        let app = match self.graph.node(app_idx).as_app() {
            Some(a) => a,
            None => return,
        };
        if !app.try_claim_fire() {
            return;
        }
        match self.concurrency {
            Concurrency::Inline => {
                tokio::spawn(async move {
                    self.run_app_streaming(app_idx).await;
                });
            }
            Concurrency::Bounded(_) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let permit = this
                        .semaphore
                        .clone()
                        .expect("bounded concurrency always has a semaphore")
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed while the engine is alive");
                    this.run_app_streaming(app_idx).await;
                    drop(permit);
                });
            }
        }
    }

    /// Unlike [`run_app`], this never calls `app.start()`/`app.finish()`
    /// itself — a streaming executor owns that transition and may run for
    /// an arbitrary length of time before reaching either one.
    async fn run_app_streaming(self: Arc<Self>, app_idx: NodeIndex) {
        let node = self.graph.node(app_idx);
        let app = node.as_app().expect("spawn_fire_streaming only schedules app nodes");
        debug!(oid = %node.oid, "streaming app firing");

        match self.executor.execute_streaming(&self.graph, app_idx).await {
            Ok(()) => {
                info!(oid = %node.oid, "streaming app finished");
                self.complete_outputs(app_idx);
            }
            Err(e) => {
                let _ = app.fail(node.oid.as_str());
                error!(oid = %node.oid, error = %e, "streaming app execution failed");
                self.notify_error(&node.oid, &e);
                self.propagate_error(app_idx);
            }
        }
    }

    async fn run_app(self: Arc<Self>, app_idx: NodeIndex) {
        let node = self.graph.node(app_idx);
        let app = node.as_app().expect("spawn_fire only schedules app nodes");
        if let Err(e) = app.start(node.oid.as_str()) {
            error!(oid = %node.oid, error = %e, "app failed to enter RUNNING");
            return;
        }
        debug!(oid = %node.oid, "app firing");

        match self.executor.execute(&self.graph, app_idx).await {
            Ok(()) => {
                if let Err(e) = app.finish(node.oid.as_str()) {
                    warn!(oid = %node.oid, error = %e, "app already left RUNNING before completion");
                }
                info!(oid = %node.oid, "app finished");
                self.complete_outputs(app_idx);
            }
            Err(e) => {
                let _ = app.fail(node.oid.as_str());
                error!(oid = %node.oid, error = %e, "app execution failed");
                self.notify_error(&node.oid, &e);
                self.propagate_error(app_idx);
            }
        }
    }

    fn complete_outputs(&self, app_idx: NodeIndex) {
        let outputs = self.graph.node(app_idx).edges.read().outputs.clone();
        for out_idx in outputs {
            let out_node = self.graph.node(out_idx);
            if let Some(data) = out_node.as_data() {
                if let Err(e) = data.close(out_node.oid.as_str()) {
                    error!(oid = %out_node.oid, error = %e, "failed to close output drop");
                    continue;
                }
                out_node.events.emit(&data.status_event(&out_node.oid, &out_node.uid, DropStatus::Completed));
            }
        }
    }

    /// Mark every node reachable from `app_idx` as `ERROR`, matching the
    /// "errors propagate down the DAG" behavior: a failed app's outputs, and
    /// everything they in turn feed, never become ready.
    fn propagate_error(&self, app_idx: NodeIndex) {
        let mut stack = self.graph.successors(app_idx);
        let mut seen = std::collections::HashSet::new();
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let node = self.graph.node(idx);
            match node.kind() {
                DropKind::Data(_) => {
                    if let Some(d) = node.as_data() {
                        let _ = d.mark_error(node.oid.as_str());
                        node.events.emit(&DropEvent {
                            oid: node.oid.clone(),
                            uid: node.uid.clone(),
                            topic: Topic::Status,
                            new_status: Some(DropStatus::Error),
                            new_exec_status: None,
                        });
                    }
                }
                DropKind::App(_) => {
                    if let Some(a) = node.as_app() {
                        if a.exec_status() != ExecStatus::Finished {
                            let _ = a.fail(node.oid.as_str());
                        }
                    }
                }
            }
            stack.extend(self.graph.successors(idx));
        }
    }

    fn notify_error(&self, oid: &Oid, error: &DropError) {
        for listener in self.error_listeners.read().iter() {
            listener.on_error(oid, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::spec::GraphSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AppExecutor for CountingExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl AppExecutor for FailingExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> Result<()> {
            Err(DropError::invalid_state("app", "boom"))
        }
    }

    fn chain_spec() -> GraphSpec {
        serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn producer_completion_fires_consumer_and_completes_output() {
        let graph = Arc::new(GraphBuilder::new().build(&chain_spec()).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(graph.clone(), Arc::new(CountingExecutor { runs: runs.clone() }), Concurrency::Inline);
        engine.start();

        let a_idx = graph.index_of(&Oid::new("A")).unwrap();
        let a = graph.node(a_idx);
        let data = a.as_data().unwrap();
        data.open("A").unwrap();
        data.close("A").unwrap();
        a.events.emit(&data.status_event(&a.oid, &a.uid, DropStatus::Completed));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let b_idx = graph.index_of(&Oid::new("B")).unwrap();
        assert_eq!(graph.node(b_idx).as_data().unwrap().status(), DropStatus::Completed);
    }

    #[tokio::test]
    async fn failing_app_propagates_error_to_output() {
        let graph = Arc::new(GraphBuilder::new().build(&chain_spec()).unwrap());
        let engine = Engine::new(graph.clone(), Arc::new(FailingExecutor), Concurrency::Inline);
        engine.start();

        let a_idx = graph.index_of(&Oid::new("A")).unwrap();
        let a = graph.node(a_idx);
        let data = a.as_data().unwrap();
        data.open("A").unwrap();
        data.close("A").unwrap();
        a.events.emit(&data.status_event(&a.oid, &a.uid, DropStatus::Completed));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let b_idx = graph.index_of(&Oid::new("B")).unwrap();
        assert_eq!(graph.node(b_idx).as_data().unwrap().status(), DropStatus::Error);
    }

    #[tokio::test]
    async fn external_mode_app_requires_explicit_trigger() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A"], "outputs": ["B"], "executionMode": "EXTERNAL"},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        let graph = Arc::new(GraphBuilder::new().build(&spec).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(graph.clone(), Arc::new(CountingExecutor { runs: runs.clone() }), Concurrency::Inline);
        engine.start();

        let app1 = Oid::new("App1");
        // Completing the one input produces no subscription-driven firing —
        // only an explicit trigger call does.
        let a_idx = graph.index_of(&Oid::new("A")).unwrap();
        let a = graph.node(a_idx);
        let data = a.as_data().unwrap();
        data.open("A").unwrap();
        data.close("A").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        engine.trigger(&app1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn external_mode_app_fires_only_after_trigger_count_reaches_input_arity() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "B", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "barrier", "inputs": ["A", "B"], "outputs": ["C"], "executionMode": "EXTERNAL"},
            {"oid": "C", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        let graph = Arc::new(GraphBuilder::new().build(&spec).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(graph.clone(), Arc::new(CountingExecutor { runs: runs.clone() }), Concurrency::Inline);
        engine.start();

        let app1 = Oid::new("App1");

        // Trigger is a pure driver-supplied count, independent of whether
        // the named inputs have actually completed: the first call must not
        // fire a two-input app on its own.
        engine.trigger(&app1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        engine.trigger(&app1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    struct SelfDrivingStreamingExecutor {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AppExecutor for SelfDrivingStreamingExecutor {
        async fn execute(&self, _graph: &DropGraph, _app_idx: NodeIndex) -> Result<()> {
            unreachable!("streaming apps must go through execute_streaming")
        }

        async fn execute_streaming(&self, graph: &DropGraph, app_idx: NodeIndex) -> Result<()> {
            let node = graph.node(app_idx);
            let app = node.as_app().unwrap();
            app.start(node.oid.as_str()).unwrap();
            self.runs.fetch_add(1, Ordering::SeqCst);
            app.finish(node.oid.as_str()).unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn streaming_app_fires_immediately_without_waiting_for_inputs() {
        let spec: GraphSpec = serde_json::from_value(serde_json::json!([
            {"oid": "A", "type": "data", "dropType": "memory"},
            {"oid": "App1", "type": "app", "appType": "streaming", "inputs": ["A"], "outputs": ["B"]},
            {"oid": "B", "type": "data", "dropType": "memory"},
        ]))
        .unwrap();
        let graph = Arc::new(GraphBuilder::new().build(&spec).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let engine = Engine::new(
            graph.clone(),
            Arc::new(SelfDrivingStreamingExecutor { runs: runs.clone() }),
            Concurrency::Inline,
        );
        engine.start();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let app1_idx = graph.index_of(&Oid::new("App1")).unwrap();
        assert_eq!(graph.node(app1_idx).as_app().unwrap().exec_status(), ExecStatus::Finished);
    }
}
