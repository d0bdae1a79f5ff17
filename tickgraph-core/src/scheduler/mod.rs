//! Process Loop
//!
//! The process loop owns a dedicated worker thread that ticks every live node
//! once per iteration, in the order the nodes were added.
//!
//! # Iteration
//!
//! 1. In stepped mode, wait for a permit from [`ProcessLoop::allow_run_once`].
//! 2. Drain the add/remove requests that arrived since the last iteration and
//!    apply them to the tick set.
//! 3. Measure the elapsed time since the previous iteration.
//! 4. Call `process(delta)` on each node of the tick set.
//! 5. Signal the iteration boundary, then pace to the target rate if any.
//!
//! # Mutations
//!
//! While the loop is running, [`ProcessLoop::add`] and [`ProcessLoop::remove`]
//! only enqueue; the worker applies them at the next iteration boundary, so
//! the tick set never changes under an iteration. While the loop is stopped
//! they apply immediately.
//!
//! # Stopping
//!
//! [`ProcessLoop::stop`] requests cancellation, wakes a worker parked on a
//! permit and blocks until the worker has left its loop. An iteration already
//! in progress always completes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

pub use crate::config::{LoopConfig, LoopMode};
use crate::error::{GraphError, UsageViolation};
use crate::event::panic_message;
use crate::node::Node;

enum Mutation {
    Add(Arc<Node>),
    Remove(Arc<Node>),
}

/// Identity of a node in the tick set.
fn node_key(node: &Arc<Node>) -> usize {
    Arc::as_ptr(node) as usize
}

#[derive(Default)]
struct Boundary {
    iterations: u64,
    exited: bool,
}

#[derive(Default)]
struct Shared {
    /// Requests made while running. Lock order: `pending` before `tick_set`.
    pending: Mutex<VecDeque<Mutation>>,

    /// Whether mutations must be queued. Only changed under `pending`.
    running: AtomicBool,

    tick_set: Mutex<IndexMap<usize, Arc<Node>>>,

    cancel: AtomicBool,

    /// Outstanding stepped-mode permits.
    permits: Mutex<u64>,
    permit_signal: Condvar,

    boundary: Mutex<Boundary>,
    boundary_signal: Condvar,
}

impl Shared {
    fn apply(tick_set: &mut IndexMap<usize, Arc<Node>>, mutation: Mutation) {
        match mutation {
            Mutation::Add(node) => {
                tick_set.insert(node_key(&node), node);
            }
            Mutation::Remove(node) => {
                tick_set.shift_remove(&node_key(&node));
            }
        }
    }

    fn submit(&self, mutation: Mutation) {
        let mut pending = self.pending.lock();
        if self.running.load(Ordering::Acquire) {
            pending.push_back(mutation);
        } else {
            Self::apply(&mut self.tick_set.lock(), mutation);
        }
    }

    fn drain_pending(&self) {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return;
        }
        let mut tick_set = self.tick_set.lock();
        for mutation in pending.drain(..) {
            Self::apply(&mut tick_set, mutation);
        }
    }

    /// Block until a permit is available. Returns false on cancellation.
    fn acquire_permit(&self) -> bool {
        let mut permits = self.permits.lock();
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return false;
            }
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            self.permit_signal.wait(&mut permits);
        }
    }

    fn finish_iteration(&self) {
        let mut boundary = self.boundary.lock();
        boundary.iterations += 1;
        self.boundary_signal.notify_all();
    }
}

/// Marks the worker as exited, even if it unwinds.
struct ExitSignal(Arc<Shared>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let mut boundary = self.0.boundary.lock();
        boundary.exited = true;
        self.0.boundary_signal.notify_all();
    }
}

/// Drives node ticks on a worker thread.
pub struct ProcessLoop {
    config: LoopConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Add a node to the tick set (deferred while running).
    pub fn add(&self, node: Arc<Node>) {
        self.shared.submit(Mutation::Add(node));
    }

    /// Remove a node from the tick set (deferred while running).
    pub fn remove(&self, node: &Arc<Node>) {
        self.shared.submit(Mutation::Remove(Arc::clone(node)));
    }

    /// Whether the node is in the live tick set.
    ///
    /// Requests still queued for the next iteration are not reflected.
    pub fn contains(&self, node: &Arc<Node>) -> bool {
        self.shared.tick_set.lock().contains_key(&node_key(node))
    }

    /// Number of nodes in the live tick set.
    pub fn node_count(&self) -> usize {
        self.shared.tick_set.lock().len()
    }

    /// Number of queued add/remove requests.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Completed iterations since the loop was created.
    pub fn iteration_count(&self) -> u64 {
        self.shared.boundary.lock().iterations
    }

    /// Grant one stepped-mode iteration. Permits accumulate.
    pub fn allow_run_once(&self) {
        let mut permits = self.shared.permits.lock();
        *permits += 1;
        self.shared.permit_signal.notify_one();
    }

    /// Block until at least `target` iterations have completed.
    ///
    /// Returns false on timeout or when the worker exits first.
    pub fn wait_for_iteration(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut boundary = self.shared.boundary.lock();
        while boundary.iterations < target {
            if boundary.exited {
                return false;
            }
            if self
                .shared
                .boundary_signal
                .wait_until(&mut boundary, deadline)
                .timed_out()
            {
                return boundary.iterations >= target;
            }
        }
        true
    }

    /// Start the worker thread.
    ///
    /// Permits granted while stopped are discarded.
    pub fn start(&self) -> Result<(), GraphError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(UsageViolation::LoopAlreadyRunning.into());
        }

        self.shared.cancel.store(false, Ordering::Release);
        *self.shared.permits.lock() = 0;
        self.shared.boundary.lock().exited = false;
        {
            let _pending = self.shared.pending.lock();
            self.shared.running.store(true, Ordering::Release);
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let spawned = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(shared, config));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(mode = ?self.config.mode, "process loop started");
                Ok(())
            }
            Err(err) => {
                let _pending = self.shared.pending.lock();
                self.shared.running.store(false, Ordering::Release);
                Err(GraphError::ThreadSpawn(err))
            }
        }
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Requests queued while running are applied before this returns. A
    /// concurrent `start` waits until the old worker is gone.
    pub fn stop(&self) -> Result<(), GraphError> {
        let mut worker = self.worker.lock();
        let handle = worker.take().ok_or(UsageViolation::LoopNotRunning)?;

        self.shared.cancel.store(true, Ordering::Release);
        {
            let _permits = self.shared.permits.lock();
            self.shared.permit_signal.notify_all();
        }
        {
            let mut boundary = self.shared.boundary.lock();
            while !boundary.exited {
                self.shared.boundary_signal.wait(&mut boundary);
            }
        }

        if let Err(payload) = handle.join() {
            tracing::error!(panic = panic_message(payload.as_ref()), "process loop worker panicked");
        }

        {
            let mut pending = self.shared.pending.lock();
            self.shared.running.store(false, Ordering::Release);
            let mut tick_set = self.shared.tick_set.lock();
            for mutation in pending.drain(..) {
                Shared::apply(&mut tick_set, mutation);
            }
        }
        drop(worker);

        tracing::info!(iterations = self.iteration_count(), "process loop stopped");
        Ok(())
    }
}

impl Drop for ProcessLoop {
    fn drop(&mut self) {
        if self.worker.get_mut().is_some() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for ProcessLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLoop")
            .field("mode", &self.config.mode)
            .field("running", &self.is_running())
            .field("nodes", &self.node_count())
            .field("iterations", &self.iteration_count())
            .finish()
    }
}

fn run(shared: Arc<Shared>, config: LoopConfig) {
    let _exit = ExitSignal(Arc::clone(&shared));
    let stepped = config.mode == LoopMode::Stepped;
    let budget = config.frame_budget();

    let mut batch: Vec<Arc<Node>> = Vec::new();
    let mut last = Instant::now();

    loop {
        if shared.cancel.load(Ordering::Acquire) {
            break;
        }
        if stepped && !shared.acquire_permit() {
            break;
        }

        let started = Instant::now();
        shared.drain_pending();

        let delta = started.duration_since(last).as_secs_f64();
        last = started;

        // Tick a snapshot so nodes may query the loop while processing.
        batch.extend(shared.tick_set.lock().values().cloned());
        for node in &batch {
            node.process(delta);
        }
        batch.clear();

        shared.finish_iteration();

        match budget {
            Some(budget) => {
                let elapsed = started.elapsed();
                if elapsed < budget {
                    std::thread::sleep(budget - elapsed);
                }
            }
            None if !stepped => std::thread::yield_now(),
            None => {}
        }
    }

    tracing::debug!("process loop worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InstanceId, NodeLogic, SlotDeclarations};
    use crate::registry::{ConstructionCache, NodeTypeAttributes, NodeTypeId, TypeRegistry};
    use crate::slot::{OutputSlot, SlotId};
    use crate::value::LiteralValue;

    const TICKER: NodeTypeId = NodeTypeId::from_u128(0x71c);

    /// Counts its own ticks.
    struct Ticker {
        ticks: Arc<OutputSlot<i64>>,
    }

    impl Default for Ticker {
        fn default() -> Self {
            Self {
                ticks: OutputSlot::new(0, 0),
            }
        }
    }

    impl NodeLogic for Ticker {
        fn declare_slots(&self, slots: &mut SlotDeclarations) {
            slots.output("ticks", &self.ticks);
        }

        fn process(&mut self, _delta: f64) {
            self.ticks.update(|t| t + 1);
        }
    }

    fn ticks(node: &Node) -> i64 {
        match node.output(SlotId(0)).unwrap().literal() {
            Some(LiteralValue::Int(ticks)) => ticks,
            other => panic!("unexpected tick literal {other:?}"),
        }
    }

    fn node() -> Arc<Node> {
        let registry = TypeRegistry::new();
        registry.register_node::<Ticker>(NodeTypeAttributes::new(TICKER)).unwrap();
        let cache = ConstructionCache::new();
        let (info, logic) = cache.construct(&registry, TICKER).unwrap();
        let node = Node::new(info, logic);
        node.set_instance_id(InstanceId::new(), &registry, &cache).unwrap();
        node
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn stopped_loop_applies_mutations_immediately() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        let a = node();
        let b = node();

        process_loop.add(Arc::clone(&a));
        process_loop.add(Arc::clone(&b));
        assert_eq!(process_loop.node_count(), 2);

        process_loop.remove(&a);
        assert!(!process_loop.contains(&a));
        assert!(process_loop.contains(&b));
        assert_eq!(process_loop.pending_count(), 0);
    }

    #[test]
    fn stepped_loop_runs_one_iteration_per_permit() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        process_loop.start().unwrap();

        process_loop.allow_run_once();
        assert!(process_loop.wait_for_iteration(1, WAIT));

        // No permit, no progress.
        assert!(!process_loop.wait_for_iteration(2, Duration::from_millis(50)));

        process_loop.allow_run_once();
        process_loop.allow_run_once();
        assert!(process_loop.wait_for_iteration(3, WAIT));

        process_loop.stop().unwrap();
    }

    #[test]
    fn running_loop_defers_mutations_to_the_next_iteration() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        process_loop.start().unwrap();

        let a = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let a = node();
                    process_loop.add(Arc::clone(&a));
                    a
                })
                .join()
                .unwrap()
        });
        assert_eq!(process_loop.pending_count(), 1);
        assert!(!process_loop.contains(&a));
        assert_eq!(ticks(&a), 0);

        // Applied before the first pass, so it ticks in that same iteration.
        process_loop.allow_run_once();
        assert!(process_loop.wait_for_iteration(1, WAIT));
        assert!(process_loop.contains(&a));
        assert_eq!(ticks(&a), 1);

        process_loop.allow_run_once();
        assert!(process_loop.wait_for_iteration(2, WAIT));
        assert_eq!(ticks(&a), 2);

        process_loop.stop().unwrap();
    }

    #[test]
    fn stop_applies_leftover_requests() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        process_loop.start().unwrap();

        let a = node();
        process_loop.add(Arc::clone(&a));
        process_loop.stop().unwrap();

        assert!(process_loop.contains(&a));
        assert_eq!(process_loop.pending_count(), 0);
        assert!(!process_loop.is_running());
    }

    #[test]
    fn start_and_stop_misuse() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        assert!(matches!(
            process_loop.stop(),
            Err(GraphError::Usage(UsageViolation::LoopNotRunning))
        ));

        process_loop.start().unwrap();
        assert!(matches!(
            process_loop.start(),
            Err(GraphError::Usage(UsageViolation::LoopAlreadyRunning))
        ));

        process_loop.stop().unwrap();
        assert!(matches!(
            process_loop.stop(),
            Err(GraphError::Usage(UsageViolation::LoopNotRunning))
        ));

        // Restartable after a stop.
        process_loop.start().unwrap();
        process_loop.stop().unwrap();
    }

    #[test]
    fn permits_granted_while_stopped_are_discarded() {
        let process_loop = ProcessLoop::new(LoopConfig::stepped());
        let a = node();
        process_loop.add(Arc::clone(&a));

        process_loop.allow_run_once();
        process_loop.allow_run_once();
        process_loop.start().unwrap();
        assert!(!process_loop.wait_for_iteration(1, Duration::from_millis(50)));
        assert_eq!(ticks(&a), 0);

        process_loop.allow_run_once();
        assert!(process_loop.wait_for_iteration(1, WAIT));
        process_loop.stop().unwrap();
        assert_eq!(ticks(&a), 1);
    }

    #[test]
    fn racing_start_and_stop_always_settle() {
        let process_loop = ProcessLoop::new(LoopConfig::free(None));
        process_loop.add(node());

        for _ in 0..50 {
            process_loop.start().unwrap();
            std::thread::scope(|scope| {
                let stopper = scope.spawn(|| process_loop.stop());
                let starter = scope.spawn(|| process_loop.start());
                stopper.join().unwrap().unwrap();
                // Either ran before the stop or after it.
                let _ = starter.join().unwrap();
            });
            if process_loop.is_running() {
                process_loop.stop().unwrap();
            }
            assert!(!process_loop.is_running());
            assert_eq!(process_loop.pending_count(), 0);
        }
    }

    #[test]
    fn free_loop_ticks_nodes_until_stopped() {
        let process_loop = ProcessLoop::new(LoopConfig::free(Some(500.0)));
        let a = node();
        process_loop.add(Arc::clone(&a));

        process_loop.start().unwrap();
        assert!(process_loop.wait_for_iteration(3, WAIT));
        process_loop.stop().unwrap();

        assert!(ticks(&a) >= 3);
        assert_eq!(ticks(&a) as u64, process_loop.iteration_count());
        let settled = process_loop.iteration_count();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(process_loop.iteration_count(), settled);
    }
}
