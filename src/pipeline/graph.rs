//! Pipeline graph: explicit subscriptions between modules, run/stop lifecycle.
//!
//! Every module gets a bounded input channel and a dedicated runner thread.
//! Producers hand messages to the channels of their subscribers and move on;
//! they only wait for channel capacity, never for a subscriber's processing.

use crate::defaults;
use crate::pipeline::error::{ErrorReporter, LogReporter, ModuleError, PipelineError};
use crate::pipeline::message::UpdateMessage;
use crate::pipeline::module::{Module, ModuleState, StateCell};
use crate::pipeline::validator::StreamValidator;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handle to a module added to a [`PipelineGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime settings for a pipeline graph.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Capacity of each module's input channel.
    pub channel_capacity: usize,
    /// Check every producer's output against the ADD/REVOKE/COMMIT lifecycle.
    pub validate_protocol: bool,
    /// Longest a runner blocks before re-checking its stop flag.
    pub poll_interval: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::CHANNEL_CAPACITY,
            validate_protocol: false,
            poll_interval: Duration::from_millis(defaults::WORKER_POLL_MS),
        }
    }
}

/// Counts one unit of pending work until dropped.
///
/// [`PipelineHandle::wait_until_idle`] returns once no message is queued and
/// no guard is alive.
#[derive(Debug)]
pub struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl InFlight {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A message queued for a module.
///
/// Counts as pending work until the runner has processed it, or until it is
/// dropped unprocessed (stop, closed channel, stopped module).
struct Delivery {
    message: UpdateMessage,
    work: InFlight,
}

/// Where an emitter sends its output.
#[derive(Clone)]
enum Target {
    /// Input channel of a module running in a graph.
    Module(Sender<Delivery>),
    /// Plain channel, for driving a module outside a graph.
    Channel(Sender<UpdateMessage>),
}

impl Target {
    fn send_timeout(
        &self,
        delivery: Delivery,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<Delivery>> {
        match self {
            Target::Module(tx) => tx.send_timeout(delivery, timeout),
            Target::Channel(tx) => {
                let Delivery { message, work } = delivery;
                tx.send_timeout(message, timeout).map_err(|e| match e {
                    SendTimeoutError::Timeout(message) => {
                        SendTimeoutError::Timeout(Delivery { message, work })
                    }
                    SendTimeoutError::Disconnected(message) => {
                        SendTimeoutError::Disconnected(Delivery { message, work })
                    }
                })
            }
        }
    }
}

/// Delivers a module's output to all of its subscribers.
///
/// Cloneable so a module can hand it to a thread it owns.
#[derive(Clone)]
pub struct Emitter {
    producer: &'static str,
    targets: Vec<Target>,
    in_flight: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    validator: Option<Arc<Mutex<StreamValidator>>>,
    reporter: Arc<dyn ErrorReporter>,
    poll_interval: Duration,
}

impl Emitter {
    /// Creates a standalone emitter that feeds a single channel.
    ///
    /// For driving a module outside a graph.
    pub fn channel(producer: &'static str, capacity: usize) -> (Self, Receiver<UpdateMessage>) {
        let (tx, rx) = bounded(capacity);
        let emitter = Self {
            producer,
            targets: vec![Target::Channel(tx)],
            in_flight: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(true)),
            validator: None,
            reporter: Arc::new(LogReporter),
            poll_interval: Duration::from_millis(defaults::WORKER_POLL_MS),
        };
        (emitter, rx)
    }

    /// Sends `message` to every subscriber, in subscription order.
    ///
    /// Blocks only while a subscriber's channel is full and the producer is
    /// still running. Returns the number of subscribers that received it.
    pub fn emit(&self, message: UpdateMessage) -> usize {
        if message.is_empty() {
            return 0;
        }

        if let Some(validator) = &self.validator
            && let Ok(mut validator) = validator.lock()
            && let Err(violation) = validator.check(&message)
        {
            self.reporter.report(
                self.producer,
                &ModuleError::Recoverable(format!("protocol violation: {}", violation)),
            );
        }

        let mut delivered = 0;
        for target in &self.targets {
            let mut pending = Delivery {
                message: message.clone(),
                work: self.hold(),
            };
            loop {
                match target.send_timeout(pending, self.poll_interval) {
                    Ok(()) => {
                        delivered += 1;
                        break;
                    }
                    Err(SendTimeoutError::Timeout(returned)) => {
                        if !self.running.load(Ordering::SeqCst) {
                            tracing::debug!(stage = self.producer, "dropping output on stop");
                            break;
                        }
                        pending = returned;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        tracing::debug!(stage = self.producer, "subscriber has stopped");
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Marks work in progress that is not yet visible as a queued message.
    pub fn hold(&self) -> InFlight {
        InFlight::new(self.in_flight.clone())
    }

    /// Reports an error raised off the runner thread, under the producer's name.
    pub fn report(&self, error: &ModuleError) {
        self.reporter.report(self.producer, error);
    }

    /// Returns false once the producing module has been asked to stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Name of the producing module.
    pub fn producer(&self) -> &'static str {
        self.producer
    }

    /// Stops this emitter (and every clone of it) from waiting on full channels.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct Node {
    module: Box<dyn Module>,
    subscribers: Vec<ModuleId>,
}

/// A DAG of modules connected by explicit subscriptions.
pub struct PipelineGraph {
    nodes: Vec<Node>,
    config: GraphConfig,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineGraph {
    /// Creates an empty graph with the default error reporter.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            config: GraphConfig::default(),
            error_reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Adds a module and returns its handle.
    pub fn add<M: Module>(&mut self, module: M) -> ModuleId {
        self.add_boxed(Box::new(module))
    }

    pub fn add_boxed(&mut self, module: Box<dyn Module>) -> ModuleId {
        self.nodes.push(Node {
            module,
            subscribers: Vec::new(),
        });
        ModuleId(self.nodes.len() - 1)
    }

    /// Makes `to` receive everything `from` emits.
    ///
    /// Rejects unknown ids, self-subscriptions and subscriptions that would
    /// close a cycle. Subscribing twice is a no-op.
    pub fn subscribe(&mut self, from: ModuleId, to: ModuleId) -> Result<(), PipelineError> {
        let from_name = self.name(from).ok_or(PipelineError::UnknownModule(from))?;
        let to_name = self.name(to).ok_or(PipelineError::UnknownModule(to))?;

        if from == to {
            return Err(PipelineError::SelfLoop { module: from_name });
        }
        if self.reachable_from(to)[from.0] {
            return Err(PipelineError::Cycle {
                from: from_name,
                to: to_name,
            });
        }

        let subscribers = &mut self.nodes[from.0].subscribers;
        if !subscribers.contains(&to) {
            subscribers.push(to);
        }
        Ok(())
    }

    /// Name of the module behind `id`.
    pub fn name(&self, id: ModuleId) -> Option<&'static str> {
        self.nodes.get(id.0).map(|node| node.module.name())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn reachable_from(&self, start: ModuleId) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if seen[id.0] {
                continue;
            }
            seen[id.0] = true;
            stack.extend(self.nodes[id.0].subscribers.iter().copied());
        }
        seen
    }

    /// Modules reachable from `entry`, producers before consumers.
    ///
    /// Ties are broken by insertion order so the result is deterministic.
    fn topological_order(&self, entry: ModuleId) -> Vec<ModuleId> {
        let reachable = self.reachable_from(entry);
        let mut indegree = vec![0usize; self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            if !reachable[idx] {
                continue;
            }
            for sub in &node.subscribers {
                indegree[sub.0] += 1;
            }
        }

        let mut ready: BTreeSet<ModuleId> = (0..self.nodes.len())
            .filter(|&idx| reachable[idx] && indegree[idx] == 0)
            .map(ModuleId)
            .collect();
        let mut order = Vec::new();
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for sub in &self.nodes[id.0].subscribers {
                indegree[sub.0] -= 1;
                if indegree[sub.0] == 0 {
                    ready.insert(*sub);
                }
            }
        }
        order
    }

    /// Starts every module reachable from `entry`.
    ///
    /// All modules are set up first, producers before consumers. Then each
    /// module's runner is started, consumers before producers, so nothing is
    /// emitted into a module that is not yet running. If any step fails, the
    /// modules already started are stopped, every module that was set up is
    /// shut down, and the error names the module that failed.
    pub fn run(self, entry: ModuleId) -> Result<PipelineHandle, PipelineError> {
        if entry.0 >= self.nodes.len() {
            return Err(PipelineError::UnknownModule(entry));
        }

        let order = self.topological_order(entry);
        let config = self.config;
        let reporter = self.error_reporter;

        let channels: Vec<(Sender<Delivery>, Receiver<Delivery>)> = (0..self
            .nodes
            .len())
            .map(|_| bounded(config.channel_capacity))
            .collect();

        let mut slots: Vec<Option<Node>> = self.nodes.into_iter().map(Some).collect();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if !order.contains(&ModuleId(idx))
                && let Some(node) = slot.take()
            {
                tracing::warn!(
                    stage = node.module.name(),
                    "module is not reachable from the entry point and will not run"
                );
            }
        }

        // Phase 1: setup, producers first.
        let mut prepared: Vec<Prepared> = Vec::with_capacity(order.len());
        for id in &order {
            let Some(mut node) = slots[id.0].take() else {
                continue;
            };
            let name = node.module.name();
            let state = StateCell::new();

            if let Err(source) = node.module.setup() {
                tracing::error!(stage = name, error = %source, "setup failed");
                node.module.shutdown();
                for mut done in prepared.into_iter().rev() {
                    done.module.shutdown();
                }
                return Err(PipelineError::Setup {
                    module: name,
                    source,
                });
            }
            state.advance(ModuleState::Ready);
            tracing::debug!(stage = name, "module ready");

            let targets = node
                .subscribers
                .iter()
                .map(|sub| Target::Module(channels[sub.0].0.clone()))
                .collect();
            prepared.push(Prepared {
                id: *id,
                name,
                module: node.module,
                targets,
                state,
            });
        }

        // Phase 2: start runners, consumers first.
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut started: Vec<ModuleRunner> = Vec::with_capacity(prepared.len());
        while let Some(mut next) = prepared.pop() {
            let running = Arc::new(AtomicBool::new(true));
            let emitter = Emitter {
                producer: next.name,
                targets: next.targets,
                in_flight: in_flight.clone(),
                running: running.clone(),
                validator: config
                    .validate_protocol
                    .then(|| Arc::new(Mutex::new(StreamValidator::new()))),
                reporter: reporter.clone(),
                poll_interval: config.poll_interval,
            };

            if let Err(source) = next.module.prepare_run(&emitter) {
                tracing::error!(stage = next.name, error = %source, "failed to start");
                emitter.close();
                for runner in &mut started {
                    runner.stop();
                }
                next.module.shutdown();
                while let Some(mut rest) = prepared.pop() {
                    rest.module.shutdown();
                }
                return Err(PipelineError::Setup {
                    module: next.name,
                    source,
                });
            }

            next.state.advance(ModuleState::Running);
            let context = RunnerContext {
                name: next.name,
                running: running.clone(),
                state: next.state.clone(),
                reporter: reporter.clone(),
                poll_interval: config.poll_interval,
            };
            let input_rx = channels[next.id.0].1.clone();
            let spawned = thread::Builder::new()
                .name(format!("parley-{}", next.name))
                .spawn(move || run_module(next.module, input_rx, emitter, context));

            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    for runner in &mut started {
                        runner.stop();
                    }
                    while let Some(mut rest) = prepared.pop() {
                        rest.module.shutdown();
                    }
                    return Err(PipelineError::Spawn {
                        module: next.name,
                        message: e.to_string(),
                    });
                }
            };

            started.push(ModuleRunner {
                id: next.id,
                name: next.name,
                input: channels[next.id.0].0.clone(),
                running,
                state: next.state,
                handle: Some(handle),
            });
        }

        // Handle keeps runners in topological order.
        started.reverse();
        tracing::info!(
            modules = ?started.iter().map(|r| r.name).collect::<Vec<_>>(),
            "pipeline started"
        );

        Ok(PipelineHandle {
            runners: started,
            in_flight,
            poll_interval: config.poll_interval,
        })
    }
}

struct Prepared {
    id: ModuleId,
    name: &'static str,
    module: Box<dyn Module>,
    targets: Vec<Target>,
    state: StateCell,
}

struct RunnerContext {
    name: &'static str,
    running: Arc<AtomicBool>,
    state: StateCell,
    reporter: Arc<dyn ErrorReporter>,
    poll_interval: Duration,
}

/// Main processing loop for one module.
fn run_module(
    mut module: Box<dyn Module>,
    input_rx: Receiver<Delivery>,
    emitter: Emitter,
    context: RunnerContext,
) {
    let name = context.name;

    while context.running.load(Ordering::SeqCst) {
        let Delivery { message, work } = match input_rx.recv_timeout(context.poll_interval) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let outcome = module.process_update(message);
        let fatal = match outcome {
            Ok(Some(output)) => {
                emitter.emit(output);
                false
            }
            Ok(None) => false,
            Err(error) => {
                context.reporter.report(name, &error);
                error.is_fatal()
            }
        };
        // Output is queued downstream before this message stops counting.
        drop(work);

        if fatal {
            break;
        }
    }

    emitter.close();
    module.shutdown();

    // Disconnects the input. Queued messages, and any sent from now on, are
    // dropped unprocessed and stop counting as pending work.
    drop(input_rx);

    context.state.advance(ModuleState::Stopped);
    tracing::debug!(stage = name, "module stopped");
}

/// A started module as seen from the handle.
struct ModuleRunner {
    id: ModuleId,
    name: &'static str,
    input: Sender<Delivery>,
    running: Arc<AtomicBool>,
    state: StateCell,
    handle: Option<JoinHandle<()>>,
}

impl ModuleRunner {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!(stage = self.name, "module thread panicked");
        }
        self.state.advance(ModuleState::Stopped);
    }
}

/// Handle to a running pipeline.
///
/// Dropping the handle stops the pipeline.
pub struct PipelineHandle {
    runners: Vec<ModuleRunner>,
    in_flight: Arc<AtomicUsize>,
    poll_interval: Duration,
}

impl PipelineHandle {
    /// Stops every module in reverse topological order and joins its thread.
    pub fn stop(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        let was_running = self.runners.iter().any(|r| r.handle.is_some());
        for runner in self.runners.iter_mut().rev() {
            runner.stop();
        }
        if was_running {
            tracing::info!("pipeline stopped");
        }
    }

    /// Delivers `message` to module `id` as if an upstream module emitted it.
    pub fn inject(&self, id: ModuleId, message: UpdateMessage) -> Result<(), PipelineError> {
        let runner = self
            .runners
            .iter()
            .find(|r| r.id == id)
            .ok_or(PipelineError::UnknownModule(id))?;

        let mut pending = Delivery {
            message,
            work: InFlight::new(self.in_flight.clone()),
        };
        loop {
            if runner.state.get() != ModuleState::Running {
                return Err(PipelineError::NotRunning {
                    module: runner.name,
                });
            }
            match runner.input.send_timeout(pending, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => pending = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PipelineError::NotRunning {
                        module: runner.name,
                    });
                }
            }
        }
    }

    /// Blocks until no message is queued or being processed and no producer
    /// holds pending work. Returns false if `timeout` elapses first.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(5);
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
    }

    /// Current lifecycle state of module `id`, if it was started.
    pub fn state(&self, id: ModuleId) -> Option<ModuleState> {
        self.runners
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.state.get())
    }

    /// Returns true while at least one module is running.
    pub fn is_running(&self) -> bool {
        self.runners
            .iter()
            .any(|r| r.state.get() == ModuleState::Running)
    }

    /// Number of queued messages plus outstanding work guards.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Names of the started modules, producers first.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.runners.iter().map(|r| r.name).collect()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::message::UpdateType;
    use crate::pipeline::unit::IncrementalUnit;

    #[derive(Default)]
    struct MockReporter {
        errors: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, module: &str, error: &ModuleError) {
            let mut errors = self.errors.lock().unwrap();
            errors.push((module.to_string(), error.to_string()));
        }
    }

    #[derive(Clone, Default)]
    struct Calls {
        setup: Arc<AtomicUsize>,
        shutdown: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<String>>>,
    }

    /// Forwards text units, upper-cased.
    struct Upper {
        calls: Calls,
    }

    impl Module for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn setup(&mut self) -> Result<(), ModuleError> {
            self.calls.setup.fetch_add(1, Ordering::SeqCst);
            self.calls.log.lock().unwrap().push("setup upper".into());
            Ok(())
        }

        fn process_update(
            &mut self,
            message: UpdateMessage,
        ) -> Result<Option<UpdateMessage>, ModuleError> {
            let mut out = UpdateMessage::default();
            for (unit, tag) in message.iter() {
                let text = unit.as_text().unwrap_or_default().to_uppercase();
                out.push(IncrementalUnit::text("upper", text), tag);
            }
            Ok(Some(out))
        }

        fn shutdown(&mut self) {
            self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
            self.calls.log.lock().unwrap().push("shutdown upper".into());
        }
    }

    /// Records every text unit it receives.
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        calls: Calls,
    }

    impl Recorder {
        fn new(name: &'static str, calls: Calls) -> (Self, Arc<Mutex<Vec<String>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name,
                    seen: seen.clone(),
                    calls,
                },
                seen,
            )
        }
    }

    impl Module for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn setup(&mut self) -> Result<(), ModuleError> {
            self.calls.log.lock().unwrap().push(format!("setup {}", self.name));
            Ok(())
        }

        fn process_update(
            &mut self,
            message: UpdateMessage,
        ) -> Result<Option<UpdateMessage>, ModuleError> {
            for (unit, tag) in message.iter() {
                let text = unit.as_text().unwrap_or_default();
                self.seen.lock().unwrap().push(format!("{tag} {text}"));
            }
            Ok(None)
        }

        fn shutdown(&mut self) {
            self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
            self.calls
                .log
                .lock()
                .unwrap()
                .push(format!("shutdown {}", self.name));
        }
    }

    /// Fails on demand.
    struct Faulty {
        setup_error: Option<ModuleError>,
        process_error: Option<ModuleError>,
        calls: Calls,
    }

    impl Module for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn setup(&mut self) -> Result<(), ModuleError> {
            match &self.setup_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn process_update(
            &mut self,
            message: UpdateMessage,
        ) -> Result<Option<UpdateMessage>, ModuleError> {
            let text = message
                .iter()
                .next()
                .and_then(|(unit, _)| unit.as_text().map(str::to_string))
                .unwrap_or_default();
            if text == "boom" {
                if let Some(e) = &self.process_error {
                    return Err(e.clone());
                }
            }
            Ok(Some(message))
        }

        fn shutdown(&mut self) {
            self.calls.shutdown.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn text(t: &str, tag: UpdateType) -> UpdateMessage {
        UpdateMessage::from_iu(IncrementalUnit::text("test", t), tag)
    }

    #[test]
    fn test_subscribe_rejects_self_loop() {
        let mut graph = PipelineGraph::new();
        let a = graph.add(Upper {
            calls: Calls::default(),
        });
        let err = graph.subscribe(a, a).unwrap_err();
        assert!(matches!(err, PipelineError::SelfLoop { module: "upper" }));
    }

    #[test]
    fn test_subscribe_rejects_cycle() {
        let mut graph = PipelineGraph::new();
        let a = graph.add(Upper {
            calls: Calls::default(),
        });
        let b = graph.add(Upper {
            calls: Calls::default(),
        });
        let c = graph.add(Upper {
            calls: Calls::default(),
        });
        graph.subscribe(a, b).unwrap();
        graph.subscribe(b, c).unwrap();

        let err = graph.subscribe(c, a).unwrap_err();
        assert!(matches!(err, PipelineError::Cycle { .. }));
    }

    #[test]
    fn test_subscribe_rejects_unknown_module() {
        let mut graph = PipelineGraph::new();
        let a = graph.add(Upper {
            calls: Calls::default(),
        });
        let err = graph.subscribe(a, ModuleId(7)).unwrap_err();
        assert_eq!(err.to_string(), "Unknown module #7");
    }

    #[test]
    fn test_topological_order_puts_producers_first() {
        let mut graph = PipelineGraph::new();
        let sink = graph.add(Upper {
            calls: Calls::default(),
        });
        let middle = graph.add(Upper {
            calls: Calls::default(),
        });
        let source = graph.add(Upper {
            calls: Calls::default(),
        });
        graph.subscribe(source, middle).unwrap();
        graph.subscribe(middle, sink).unwrap();

        assert_eq!(graph.topological_order(source), vec![source, middle, sink]);
    }

    #[test]
    fn test_run_delivers_in_order_and_fans_out() {
        let calls = Calls::default();
        let mut graph = PipelineGraph::new();
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let (left, left_seen) = Recorder::new("left", calls.clone());
        let (right, right_seen) = Recorder::new("right", calls.clone());
        let left = graph.add(left);
        let right = graph.add(right);
        graph.subscribe(upper, left).unwrap();
        graph.subscribe(upper, right).unwrap();

        let handle = graph.run(upper).unwrap();
        handle.inject(upper, text("one", UpdateType::Add)).unwrap();
        handle.inject(upper, text("two", UpdateType::Add)).unwrap();
        handle.inject(upper, text("three", UpdateType::Commit)).unwrap();
        assert!(handle.wait_until_idle(Duration::from_secs(5)));

        let expected = vec!["ADD ONE", "ADD TWO", "COMMIT THREE"];
        assert_eq!(*left_seen.lock().unwrap(), expected);
        assert_eq!(*right_seen.lock().unwrap(), expected);
        handle.stop();
    }

    #[test]
    fn test_states_follow_lifecycle_and_shutdown_runs_once() {
        let calls = Calls::default();
        let mut graph = PipelineGraph::new();
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let (recorder, _) = Recorder::new("recorder", calls.clone());
        let recorder = graph.add(recorder);
        graph.subscribe(upper, recorder).unwrap();

        let handle = graph.run(upper).unwrap();
        assert_eq!(handle.state(upper), Some(ModuleState::Running));
        assert_eq!(handle.state(recorder), Some(ModuleState::Running));
        assert!(handle.is_running());
        assert_eq!(handle.module_names(), vec!["upper", "recorder"]);

        handle.stop();
        assert_eq!(calls.setup.load(Ordering::SeqCst), 1);
        assert_eq!(calls.shutdown.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_runs_in_reverse_topological_order() {
        let calls = Calls::default();
        let mut graph = PipelineGraph::new();
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let (recorder, _) = Recorder::new("recorder", calls.clone());
        let recorder = graph.add(recorder);
        graph.subscribe(upper, recorder).unwrap();

        graph.run(upper).unwrap().stop();

        let log = calls.log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "setup upper",
                "setup recorder",
                "shutdown recorder",
                "shutdown upper"
            ]
        );
    }

    #[test]
    fn test_setup_failure_aborts_and_shuts_down_everything() {
        let calls = Calls::default();
        let mut graph = PipelineGraph::new();
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let faulty = graph.add(Faulty {
            setup_error: Some(ModuleError::fatal("device missing")),
            process_error: None,
            calls: calls.clone(),
        });
        graph.subscribe(upper, faulty).unwrap();

        let err = match graph.run(upper) {
            Err(e) => e,
            Ok(_) => panic!("pipeline should not start"),
        };
        assert!(matches!(
            err,
            PipelineError::Setup {
                module: "faulty",
                ..
            }
        ));
        // Both the module set up before and the failing module are shut down.
        assert_eq!(calls.shutdown.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recoverable_error_drops_message_and_continues() {
        let calls = Calls::default();
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let mut graph = PipelineGraph::new().with_error_reporter(reporter);
        let faulty = graph.add(Faulty {
            setup_error: None,
            process_error: Some(ModuleError::recoverable("bad input")),
            calls: calls.clone(),
        });
        let (recorder, seen) = Recorder::new("recorder", calls.clone());
        let recorder = graph.add(recorder);
        graph.subscribe(faulty, recorder).unwrap();

        let handle = graph.run(faulty).unwrap();
        handle.inject(faulty, text("ok", UpdateType::Add)).unwrap();
        handle.inject(faulty, text("boom", UpdateType::Add)).unwrap();
        handle.inject(faulty, text("fine", UpdateType::Commit)).unwrap();
        assert!(handle.wait_until_idle(Duration::from_secs(5)));

        assert_eq!(*seen.lock().unwrap(), vec!["ADD ok", "COMMIT fine"]);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "faulty");
        assert!(errors[0].1.contains("bad input"));
        assert_eq!(handle.state(faulty), Some(ModuleState::Running));
    }

    #[test]
    fn test_fatal_error_stops_module() {
        let calls = Calls::default();
        let reporter = Arc::new(MockReporter::default());
        let mut graph = PipelineGraph::new().with_error_reporter(reporter);
        let faulty = graph.add(Faulty {
            setup_error: None,
            process_error: Some(ModuleError::fatal("gone")),
            calls: calls.clone(),
        });

        let handle = graph.run(faulty).unwrap();
        handle.inject(faulty, text("boom", UpdateType::Add)).unwrap();
        assert!(handle.wait_until_idle(Duration::from_secs(5)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state(faulty) != Some(ModuleState::Stopped) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.state(faulty), Some(ModuleState::Stopped));
        assert_eq!(calls.shutdown.load(Ordering::SeqCst), 1);

        let err = handle.inject(faulty, text("again", UpdateType::Add));
        assert!(matches!(err, Err(PipelineError::NotRunning { .. })));
    }

    #[test]
    fn test_messages_left_behind_by_fatal_stop_are_released() {
        /// Takes a while on every message, then gives up for good.
        struct SlowFatal;

        impl Module for SlowFatal {
            fn name(&self) -> &'static str {
                "slow"
            }

            fn process_update(
                &mut self,
                _message: UpdateMessage,
            ) -> Result<Option<UpdateMessage>, ModuleError> {
                thread::sleep(Duration::from_millis(100));
                Err(ModuleError::fatal("device lost"))
            }
        }

        let reporter = Arc::new(MockReporter::default());
        let mut graph = PipelineGraph::new().with_error_reporter(reporter);
        let slow = graph.add(SlowFatal);
        let handle = graph.run(slow).unwrap();

        for i in 0..5 {
            // Late ones may find the module already stopped.
            if handle.inject(slow, text(&format!("m{i}"), UpdateType::Add)).is_err() {
                break;
            }
        }
        assert!(handle.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(handle.in_flight(), 0);
        handle.stop();
    }

    #[test]
    fn test_delivery_dropped_in_closed_channel_stops_counting() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = bounded(4);
        let target = Target::Module(tx);
        for _ in 0..3 {
            let delivery = Delivery {
                message: text("queued", UpdateType::Add),
                work: InFlight::new(counter.clone()),
            };
            assert!(target.send_timeout(delivery, Duration::from_millis(10)).is_ok());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        drop(rx);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let late = Delivery {
            message: text("late", UpdateType::Add),
            work: InFlight::new(counter.clone()),
        };
        assert!(target.send_timeout(late, Duration::from_millis(10)).is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreachable_modules_do_not_run() {
        let calls = Calls::default();
        let mut graph = PipelineGraph::new();
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let (orphan, _) = Recorder::new("orphan", calls.clone());
        let orphan = graph.add(orphan);

        let handle = graph.run(upper).unwrap();
        assert_eq!(handle.state(orphan), None);
        assert_eq!(handle.module_names(), vec!["upper"]);
    }

    #[test]
    fn test_protocol_violation_is_reported() {
        let calls = Calls::default();
        let reporter = Arc::new(MockReporter::default());
        let errors = reporter.errors.clone();
        let config = GraphConfig {
            validate_protocol: true,
            ..GraphConfig::default()
        };
        let mut graph = PipelineGraph::new()
            .with_config(config)
            .with_error_reporter(reporter);
        let upper = graph.add(Upper {
            calls: calls.clone(),
        });
        let (recorder, _) = Recorder::new("recorder", calls.clone());
        let recorder = graph.add(recorder);
        graph.subscribe(upper, recorder).unwrap();

        let handle = graph.run(upper).unwrap();
        // Upper mints a fresh unit, so its REVOKE names nothing it added.
        handle.inject(upper, text("x", UpdateType::Revoke)).unwrap();
        assert!(handle.wait_until_idle(Duration::from_secs(5)));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("protocol violation"));
    }

    #[test]
    fn test_in_flight_guard_blocks_idle() {
        let (emitter, _rx) = Emitter::channel("test", 4);
        let guard = emitter.hold();
        assert_eq!(emitter.in_flight.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(emitter.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emit_to_stopped_subscriber_does_not_block() {
        let (emitter, rx) = Emitter::channel("test", 1);
        drop(rx);
        assert_eq!(emitter.emit(text("lost", UpdateType::Add)), 0);
        assert_eq!(emitter.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emit_gives_up_on_full_channel_after_close() {
        let (emitter, rx) = Emitter::channel("test", 1);
        assert_eq!(emitter.emit(text("first", UpdateType::Add)), 1);
        emitter.close();
        assert_eq!(emitter.emit(text("second", UpdateType::Add)), 0);
        assert_eq!(rx.len(), 1);
    }
}
