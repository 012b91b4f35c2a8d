//! The discrete-event executor.
//!
//! A [`Sim`] owns a virtual clock, an event queue and a set of processes.
//! Processes are ordinary `async` blocks. They run one at a time on the
//! thread that owns the `Sim`, and only ever suspend at two points:
//! [`Process::timeout`] and [`Process::receive`]. Each suspension registers
//! exactly one event in the queue, and the run loop resumes processes in
//! `(due, sequence)` order.
//!
//! # Examples
//!
//! ```
//! use ges_core::{Sim, SimTime, sim::ExitStatus};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let mut sim = Sim::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let writer = log.clone();
//! sim.handle()
//!     .spawn("ticker", move |process| async move {
//!         loop {
//!             process.timeout(1.0)?.await;
//!             writer.borrow_mut().push(process.now().as_secs());
//!         }
//!     })
//!     .unwrap();
//!
//! let status = sim.run(Some(SimTime::from_secs(3.5))).unwrap();
//! assert_eq!(status, ExitStatus::ReachedLimit);
//! assert_eq!(*log.borrow(), vec![1.0, 2.0, 3.0]);
//! assert_eq!(sim.now(), SimTime::from_secs(3.5));
//! ```

pub mod scheduler;
mod process;

pub(crate) use process::WaitState;
pub use process::{
    Interrupt, Process, ProcessError, ProcessId, ProcessState, Timeout, WaitId, WaitKind, Wake,
    WakeReason,
};

use crate::{logging, SimTime};
use futures::future::LocalBoxFuture;
use rand::{rngs::SmallRng, SeedableRng};
use rustc_hash::FxHashMap;
use scheduler::{Event, Scheduler};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    fmt::{self, Display},
    future::Future,
    rc::Rc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;

type Task = LocalBoxFuture<'static, Result<(), ProcessError>>;

/// Tunables for a [`Sim`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the simulation's random number generator. Runs with the same
    /// seed and the same processes replay identically.
    pub seed: Option<u64>,
    /// Wall-clock seconds per simulated second. When unset the simulation
    /// runs as fast as it can.
    pub realtime_factor: Option<f64>,
    /// Capacity given to subscriber channels of new tunnels. `None` means
    /// unbounded.
    pub tunnel_capacity: Option<usize>,
}

/// How a call to [`Sim::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// No events were left to process.
    Exhausted,
    /// The next event was due at or after the requested limit.
    ReachedLimit,
    /// [`SimHandle::shut_down`] was called.
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum SimError {
    #[error("Delay must be finite and non-negative, got {0}")]
    InvalidDelay(f64),
    #[error("The simulation has been shut down")]
    ShutDown,
    #[error("Process {0} does not exist")]
    UnknownProcess(ProcessId),
    #[error("Process {0} has already terminated")]
    ProcessTerminated(ProcessId),
    #[error("Process {0} is not suspended")]
    NotSuspended(ProcessId),
    #[error("Process {0} suspended while it was already waiting")]
    AlreadyWaiting(ProcessId),
}

/// Aborts a run when a process returns an error.
#[derive(Debug, ThisError)]
pub struct ProcessFailure {
    pub process: ProcessId,
    pub name: String,
    pub error: ProcessError,
}

impl Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Process '{}' ({}) failed: {}",
            self.name, self.process, self.error
        )
    }
}

struct ProcessEntry {
    name: String,
    state: ProcessState,
    /// The live wait token, if the process is waiting for an event.
    wait: Option<WaitId>,
    /// Set by the run loop right before the process is polled.
    wake: Option<(WaitId, WakeReason)>,
    /// An interrupt aimed at the live wait. It wins over any other wake for
    /// that wait, even one scheduled earlier at the same instant.
    interrupt: Option<(WaitId, Interrupt)>,
}

struct Kernel {
    scheduler: Scheduler,
    processes: FxHashMap<ProcessId, ProcessEntry>,
    next_process: u64,
    next_wait: u64,
    rng: SmallRng,
    config: SimConfig,
    shut_down: bool,
    /// An invariant violation recorded while a process was being polled.
    fault: Option<(ProcessId, SimError)>,
    /// Wall-clock instant and simulated time that realtime pacing counts
    /// from. Kept across calls to [`Sim::run`].
    pacing: Option<(Instant, SimTime)>,
}

impl Kernel {
    fn entry(&mut self, process: ProcessId) -> Result<&mut ProcessEntry, SimError> {
        self.processes
            .get_mut(&process)
            .ok_or(SimError::UnknownProcess(process))
    }

    fn is_stale(&self, event: &Event) -> bool {
        match self.processes.get(&event.process) {
            Some(entry) => entry.state == ProcessState::Terminated || entry.wait != Some(event.wait),
            None => true,
        }
    }

    /// Drops stale events from the head of the queue without moving the
    /// clock, then returns the due time of the first live one.
    fn next_due(&mut self) -> Option<SimTime> {
        while let Some(event) = self.scheduler.peek() {
            if !self.is_stale(event) {
                return Some(event.due);
            }
            if let Some(event) = self.scheduler.discard() {
                tracing::trace!(process = %event.process, sequence = event.sequence, "discarding stale event");
            }
        }
        None
    }
}

struct Shared {
    kernel: RefCell<Kernel>,
    tasks: RefCell<FxHashMap<ProcessId, Task>>,
}

/// A cheap, clonable reference to a running [`Sim`].
///
/// Handles are how processes and their collaborators spawn further
/// processes, read the clock, draw random numbers and interrupt each other.
#[derive(Clone)]
pub struct SimHandle {
    shared: Rc<Shared>,
}

impl SimHandle {
    /// The current simulated time.
    pub fn now(&self) -> SimTime {
        self.shared.kernel.borrow().scheduler.now()
    }

    /// Registers a new process. `body` is called immediately to build the
    /// process's future, which is first polled at the current time after
    /// every event already due now.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, body: F) -> Result<ProcessId, SimError>
    where
        F: FnOnce(Process) -> Fut,
        Fut: Future<Output = Result<(), ProcessError>> + 'static,
    {
        let name = name.into();
        let (id, start) = {
            let mut kernel = self.shared.kernel.borrow_mut();
            if kernel.shut_down {
                return Err(SimError::ShutDown);
            }
            let id = ProcessId::new(kernel.next_process);
            kernel.next_process += 1;
            let start = WaitId::new(kernel.next_wait);
            kernel.next_wait += 1;
            kernel.processes.insert(
                id,
                ProcessEntry {
                    name: name.clone(),
                    state: ProcessState::Runnable,
                    wait: Some(start),
                    wake: None,
                    interrupt: None,
                },
            );
            kernel.scheduler.schedule_now(id, start, WakeReason::Start);
            (id, start)
        };
        let task = body(Process::new(id, self.clone()));
        self.shared.tasks.borrow_mut().insert(id, Box::pin(task));
        tracing::trace!(process = %id, name = %name, wait = ?start, "spawned process");
        Ok(id)
    }

    /// Resumes a suspended process at the current time with
    /// [`Wake::Interrupted`].
    ///
    /// The interrupt takes precedence over any other wake already queued for
    /// the same wait. A second interrupt of the same wait is folded into the
    /// first.
    pub fn interrupt(&self, process: ProcessId, cause: impl Into<String>) -> Result<(), SimError> {
        let mut kernel = self.shared.kernel.borrow_mut();
        if kernel.shut_down {
            return Err(SimError::ShutDown);
        }
        let entry = kernel.entry(process)?;
        let wait = match (entry.state, entry.wait) {
            (ProcessState::Terminated, _) => return Err(SimError::ProcessTerminated(process)),
            (ProcessState::Suspended(_), Some(wait)) => wait,
            _ => return Err(SimError::NotSuspended(process)),
        };
        if matches!(&entry.interrupt, Some((pending, _)) if *pending == wait) {
            return Ok(());
        }
        let interrupt = Interrupt {
            cause: cause.into(),
        };
        entry.interrupt = Some((wait, interrupt.clone()));
        kernel
            .scheduler
            .schedule_now(process, wait, WakeReason::Interrupt(interrupt));
        Ok(())
    }

    /// The state of a process, or `None` if it was never spawned.
    pub fn process_state(&self, process: ProcessId) -> Option<ProcessState> {
        let kernel = self.shared.kernel.borrow();
        kernel.processes.get(&process).map(|entry| entry.state)
    }

    /// Runs `f` with the simulation's seeded random number generator.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut SmallRng) -> R) -> R {
        f(&mut self.shared.kernel.borrow_mut().rng)
    }

    pub fn config(&self) -> SimConfig {
        self.shared.kernel.borrow().config.clone()
    }

    /// Stops the run loop after the event being processed and refuses any
    /// further scheduling.
    pub fn shut_down(&self) {
        let mut kernel = self.shared.kernel.borrow_mut();
        if !kernel.shut_down {
            tracing::info!(now = %kernel.scheduler.now(), "simulation shutting down");
        }
        kernel.shut_down = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.kernel.borrow().shut_down
    }

    /// Allocates a wait token and marks the process suspended.
    pub(crate) fn begin_wait(&self, process: ProcessId, kind: WaitKind) -> Result<WaitId, SimError> {
        let mut kernel = self.shared.kernel.borrow_mut();
        if kernel.shut_down {
            return Err(SimError::ShutDown);
        }
        let wait = WaitId::new(kernel.next_wait);
        kernel.next_wait += 1;
        let entry = kernel.entry(process)?;
        if entry.wait.is_some() {
            return Err(SimError::AlreadyWaiting(process));
        }
        entry.wait = Some(wait);
        entry.state = ProcessState::Suspended(kind);
        Ok(wait)
    }

    pub(crate) fn schedule_after(
        &self,
        delay: f64,
        process: ProcessId,
        wait: WaitId,
        reason: WakeReason,
    ) -> Result<(), SimError> {
        let mut kernel = self.shared.kernel.borrow_mut();
        if kernel.shut_down {
            return Err(SimError::ShutDown);
        }
        kernel.scheduler.schedule_after(delay, process, wait, reason)?;
        Ok(())
    }

    pub(crate) fn schedule_now(
        &self,
        process: ProcessId,
        wait: WaitId,
        reason: WakeReason,
    ) -> Result<(), SimError> {
        let mut kernel = self.shared.kernel.borrow_mut();
        if kernel.shut_down {
            return Err(SimError::ShutDown);
        }
        kernel.scheduler.schedule_now(process, wait, reason);
        Ok(())
    }

    /// Claims the wake reason delivered for `wait`, if it has arrived.
    pub(crate) fn take_wake(&self, process: ProcessId, wait: WaitId) -> Option<WakeReason> {
        let mut kernel = self.shared.kernel.borrow_mut();
        let entry = kernel.processes.get_mut(&process)?;
        match entry.wake.take() {
            Some((woken, reason)) if woken == wait => Some(reason),
            other => {
                entry.wake = other;
                None
            }
        }
    }

    /// Gives up on `wait` without it completing, e.g. when the future that
    /// registered it is dropped.
    pub(crate) fn abandon_wait(&self, process: ProcessId, wait: WaitId) {
        let mut kernel = self.shared.kernel.borrow_mut();
        if let Some(entry) = kernel.processes.get_mut(&process) {
            if entry.wait == Some(wait) {
                entry.wait = None;
                if entry.state != ProcessState::Terminated {
                    entry.state = ProcessState::Runnable;
                }
            }
        }
    }

    /// Records an invariant violation; the run loop aborts with it once the
    /// offending process yields.
    pub(crate) fn fault(&self, process: ProcessId, error: SimError) {
        let mut kernel = self.shared.kernel.borrow_mut();
        if kernel.fault.is_none() {
            kernel.fault = Some((process, error));
        }
    }
}

/// A discrete-event simulation.
///
/// When a `Sim` is dropped every pending process is cancelled.
pub struct Sim {
    handle: SimHandle,
}

impl Sim {
    /// Creates a simulation seeded from entropy.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let kernel = Kernel {
            scheduler: Scheduler::new(),
            processes: FxHashMap::default(),
            next_process: 0,
            next_wait: 0,
            rng,
            config,
            shut_down: false,
            fault: None,
            pacing: None,
        };
        Self {
            handle: SimHandle {
                shared: Rc::new(Shared {
                    kernel: RefCell::new(kernel),
                    tasks: RefCell::new(FxHashMap::default()),
                }),
            },
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    pub fn now(&self) -> SimTime {
        self.handle.now()
    }

    /// The due time of the next live event. Stale events at the head of the
    /// queue are dropped on the way.
    pub fn peek(&self) -> Option<SimTime> {
        self.handle.shared.kernel.borrow_mut().next_due()
    }

    /// The number of events waiting in the queue, stale ones included.
    pub fn pending_events(&self) -> usize {
        self.handle.shared.kernel.borrow().scheduler.len()
    }

    pub fn shut_down(&self) {
        self.handle.shut_down()
    }

    /// Makes realtime pacing count from the current wall-clock instant on
    /// the next run instead of from where it was first anchored.
    pub fn restart_pacing(&self) {
        self.handle.shared.kernel.borrow_mut().pacing = None;
    }

    /// Processes events until the queue is empty, the next event is due at or
    /// after `until`, or the simulation is shut down.
    ///
    /// When stopping at the limit the clock is moved forward to `until`, so
    /// consecutive calls continue from where the previous one ended.
    ///
    /// With a realtime factor the clock never runs ahead of scaled wall time,
    /// including the stretch between the last event and `until`.
    pub fn run(&mut self, until: Option<SimTime>) -> Result<ExitStatus, ProcessFailure> {
        let factor = self
            .handle
            .config()
            .realtime_factor
            .filter(|factor| factor.is_finite() && *factor > 0.0);

        loop {
            if self.handle.is_shut_down() {
                return Ok(ExitStatus::ShutDown);
            }
            let Some(due) = self.peek() else {
                return Ok(ExitStatus::Exhausted);
            };
            let limit = until.filter(|limit| due >= *limit);
            if let Some(factor) = factor {
                self.pace(factor, limit.unwrap_or(due));
            }
            if let Some(limit) = limit {
                self.handle.shared.kernel.borrow_mut().scheduler.advance_to(limit);
                return Ok(ExitStatus::ReachedLimit);
            }
            self.step()?;
        }
    }

    /// Sleeps until the wall-clock instant that matches simulated `time`.
    fn pace(&self, factor: f64, time: SimTime) {
        let (wall_start, sim_start) = {
            let mut kernel = self.handle.shared.kernel.borrow_mut();
            let now = kernel.scheduler.now();
            *kernel.pacing.get_or_insert_with(|| (Instant::now(), now))
        };
        let elapsed = time.duration_since(sim_start).unwrap_or(0.0) * factor;
        let target = wall_start + Duration::from_secs_f64(elapsed);
        let now = Instant::now();
        if target > now {
            std::thread::sleep(target - now);
        }
    }

    /// Processes exactly one event. Returns the time it was due, or `None`
    /// if the queue was empty.
    pub fn step(&mut self) -> Result<Option<SimTime>, ProcessFailure> {
        let event = {
            let mut kernel = self.handle.shared.kernel.borrow_mut();
            kernel.next_due();
            match kernel.scheduler.pop() {
                Some(event) => event,
                None => return Ok(None),
            }
        };
        let due = event.due;
        self.dispatch(event)?;
        Ok(Some(due))
    }

    fn dispatch(&self, event: Event) -> Result<(), ProcessFailure> {
        let shared = &self.handle.shared;
        {
            let mut kernel = shared.kernel.borrow_mut();
            if kernel.is_stale(&event) {
                tracing::trace!(process = %event.process, sequence = event.sequence, "discarding stale event");
                return Ok(());
            }
            let Some(entry) = kernel.processes.get_mut(&event.process) else {
                return Ok(());
            };
            let reason = match entry.interrupt.take() {
                Some((wait, interrupt)) if wait == event.wait => WakeReason::Interrupt(interrupt),
                _ => event.reason,
            };
            entry.wait = None;
            entry.state = ProcessState::Runnable;
            entry.wake = Some((event.wait, reason));
        }

        // Removed while polled so the process can spawn others.
        let Some(mut task) = shared.tasks.borrow_mut().remove(&event.process) else {
            return Ok(());
        };
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let poll = task.as_mut().poll(&mut cx);

        match poll {
            Poll::Ready(result) => {
                drop(task);
                let name = {
                    let mut kernel = shared.kernel.borrow_mut();
                    let entry = kernel
                        .processes
                        .get_mut(&event.process)
                        .ok_or_else(|| self.missing(event.process))?;
                    entry.state = ProcessState::Terminated;
                    entry.wait = None;
                    entry.wake = None;
                    entry.interrupt = None;
                    entry.name.clone()
                };
                match result {
                    Ok(()) => {
                        tracing::trace!(process = %event.process, name = %name, "process finished");
                        Ok(())
                    }
                    Err(error) => {
                        let failure = ProcessFailure {
                            process: event.process,
                            name,
                            error,
                        };
                        logging::process_failure_event(&failure);
                        Err(failure)
                    }
                }
            }
            Poll::Pending => {
                shared.tasks.borrow_mut().insert(event.process, task);
                let mut kernel = shared.kernel.borrow_mut();
                if let Some((process, error)) = kernel.fault.take() {
                    let name = kernel
                        .processes
                        .get(&process)
                        .map(|entry| entry.name.clone())
                        .unwrap_or_default();
                    let failure = ProcessFailure {
                        process,
                        name,
                        error: error.into(),
                    };
                    drop(kernel);
                    logging::process_failure_event(&failure);
                    return Err(failure);
                }
                if let Some(entry) = kernel.processes.get_mut(&event.process) {
                    entry.wake = None;
                    if entry.wait.is_none() {
                        tracing::warn!(
                            process = %event.process,
                            name = %entry.name,
                            "process yielded without a pending wait and will never resume"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    fn missing(&self, process: ProcessId) -> ProcessFailure {
        ProcessFailure {
            process,
            name: String::new(),
            error: SimError::UnknownProcess(process).into(),
        }
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sim {
    fn drop(&mut self) {
        self.handle.shared.kernel.borrow_mut().shut_down = true;
        // Taken out first: dropping a task may touch the kernel or channels.
        let tasks = std::mem::take(&mut *self.handle.shared.tasks.borrow_mut());
        drop(tasks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (log.clone(), log)
    }

    #[test]
    fn processes_start_in_spawn_order() {
        let mut sim = Sim::new();
        let (log, reader) = recorder();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            sim.handle()
                .spawn(name, move |_| async move {
                    log.borrow_mut().push(name.to_string());
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(sim.run(None).unwrap(), ExitStatus::Exhausted);
        assert_eq!(*reader.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn timeouts_resume_in_time_order() {
        let mut sim = Sim::new();
        let (log, reader) = recorder();
        for (name, delay) in [("slow", 3.0), ("fast", 1.0), ("tie", 1.0)] {
            let log = log.clone();
            sim.handle()
                .spawn(name, move |process| async move {
                    process.timeout(delay)?.await;
                    log.borrow_mut().push(format!("{name}@{}", process.now().as_secs()));
                    Ok(())
                })
                .unwrap();
        }
        sim.run(None).unwrap();
        assert_eq!(*reader.borrow(), vec!["fast@1", "tie@1", "slow@3"]);
        assert_eq!(sim.now(), SimTime::from_secs(3.0));
    }

    #[test]
    fn run_stops_at_limit() {
        let mut sim = Sim::new();
        sim.handle()
            .spawn("ticker", |process| async move {
                loop {
                    process.timeout(10.0)?.await;
                }
            })
            .unwrap();
        assert_eq!(
            sim.run(Some(SimTime::from_secs(25.0))).unwrap(),
            ExitStatus::ReachedLimit
        );
        assert_eq!(sim.now(), SimTime::from_secs(25.0));
        // An event due exactly at the limit is left for the next run.
        assert_eq!(
            sim.run(Some(SimTime::from_secs(30.0))).unwrap(),
            ExitStatus::ReachedLimit
        );
        assert_eq!(sim.peek(), Some(SimTime::from_secs(30.0)));
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let mut sim = Sim::new();
        sim.handle()
            .spawn("bad", |process| async move {
                process.timeout(-1.0)?.await;
                Ok(())
            })
            .unwrap();
        let failure = sim.run(None).unwrap_err();
        assert_eq!(failure.name, "bad");
        assert!(matches!(
            failure.error,
            ProcessError::Sim(SimError::InvalidDelay(_))
        ));
    }

    #[test]
    fn interrupt_wakes_a_sleeping_process() {
        let mut sim = Sim::new();
        let (log, reader) = recorder();
        let handle = sim.handle();
        let sleeper = handle
            .spawn("sleeper", move |process| async move {
                match process.timeout(100.0)?.await {
                    Wake::Ready(()) => log.borrow_mut().push("slept".into()),
                    Wake::Interrupted(interrupt) => {
                        log.borrow_mut().push(format!("{}@{}", interrupt.cause, process.now().as_secs()))
                    }
                }
                Ok(())
            })
            .unwrap();
        handle
            .spawn("alarm", move |process| async move {
                process.timeout(5.0)?.await;
                process.handle().interrupt(sleeper, "alarm")?;
                Ok(())
            })
            .unwrap();
        sim.run(None).unwrap();
        assert_eq!(*reader.borrow(), vec!["alarm@5"]);
        // The abandoned timeout is dropped without moving the clock.
        assert_eq!(sim.now(), SimTime::from_secs(5.0));
        assert_eq!(sim.pending_events(), 0);
        assert_eq!(
            handle.interrupt(sleeper, "again"),
            Err(SimError::ProcessTerminated(sleeper))
        );
    }

    #[test]
    fn interrupt_beats_a_wake_due_at_the_same_instant() {
        let mut sim = Sim::new();
        let (log, reader) = recorder();
        let handle = sim.handle();
        let (_tx, rx) = crate::channel::channel::<()>(&handle, crate::Capacity::Unbounded);
        let sleeper = Rc::new(std::cell::Cell::new(None));
        let target = sleeper.clone();
        let alarm_log = log.clone();
        handle
            .spawn("alarm", move |process| async move {
                process.timeout(5.0)?.await;
                if let Some(sleeper) = target.get() {
                    process.handle().interrupt(sleeper, "alarm")?;
                    alarm_log.borrow_mut().push("sent".into());
                }
                Ok(())
            })
            .unwrap();
        let id = handle
            .spawn("sleeper", move |process| async move {
                let wake = process.timeout(5.0)?.await;
                log.borrow_mut().push(format!("interrupted={}", wake.is_interrupted()));
                process.receive(&rx).await;
                Ok(())
            })
            .unwrap();
        sleeper.set(Some(id));

        sim.run(None).unwrap();
        assert_eq!(*reader.borrow(), vec!["sent", "interrupted=true"]);
        assert_eq!(sim.now(), SimTime::from_secs(5.0));
    }

    #[test]
    fn realtime_pacing_covers_the_tail_of_each_run() {
        let mut sim = Sim::with_config(SimConfig {
            realtime_factor: Some(0.005),
            ..Default::default()
        });
        sim.handle()
            .spawn("ticker", |process| async move {
                loop {
                    process.timeout(100.0)?.await;
                }
            })
            .unwrap();
        let started = Instant::now();
        sim.run(Some(SimTime::from_secs(40.0))).unwrap();
        assert!(started.elapsed() >= Duration::from_secs_f64(0.2));
        sim.run(Some(SimTime::from_secs(80.0))).unwrap();
        assert!(started.elapsed() >= Duration::from_secs_f64(0.4));
        assert_eq!(sim.now(), SimTime::from_secs(80.0));
    }

    #[test]
    fn interrupt_errors() {
        let sim = Sim::new();
        let handle = sim.handle();
        assert_eq!(
            handle.interrupt(ProcessId::new(42), "nobody"),
            Err(SimError::UnknownProcess(ProcessId::new(42)))
        );
        let fresh = handle.spawn("fresh", |_| async { Ok(()) }).unwrap();
        assert_eq!(
            handle.interrupt(fresh, "too early"),
            Err(SimError::NotSuspended(fresh))
        );
    }

    #[test]
    fn shut_down_stops_the_loop() {
        let mut sim = Sim::new();
        let handle = sim.handle();
        handle
            .spawn("stopper", |process| async move {
                process.timeout(2.0)?.await;
                process.handle().shut_down();
                Ok(())
            })
            .unwrap();
        handle
            .spawn("forever", |process| async move {
                loop {
                    process.timeout(1.0)?.await;
                }
            })
            .unwrap();
        assert_eq!(sim.run(None).unwrap(), ExitStatus::ShutDown);
        assert_eq!(sim.now(), SimTime::from_secs(2.0));
        assert_eq!(
            handle.spawn("late", |_| async { Ok(()) }),
            Err(SimError::ShutDown)
        );
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        use rand::Rng;
        let draw = || {
            let sim = Sim::with_config(SimConfig {
                seed: Some(7),
                ..Default::default()
            });
            let handle = sim.handle();
            (0..5)
                .map(|_| handle.with_rng(|rng| rng.gen_range(0..1000)))
                .collect::<Vec<u32>>()
        };
        assert_eq!(draw(), draw());
    }
}
