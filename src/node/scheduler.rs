//! Periodic background loops.
//!
//! Each loop is a named thread that wakes every tick, runs whichever of
//! its tasks are due, and exits as soon as the shared `StopSignal` fires.
//! Loops are joined with a bounded wait; a loop that does not finish in
//! time is reported and left behind.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::StopSignal;
use crate::debug;

/// Default wake-up granularity of a loop.
pub const TICK: Duration = Duration::from_secs(1);

/// Default bound on joining all loops at shutdown.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for loops to finish.
const JOIN_POLL: Duration = Duration::from_millis(50);

type Action = Box<dyn FnMut() + Send>;

/// An action repeated every `interval`. A zero interval disables it.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    last_run: Option<Instant>,
    action: Action,
}

impl PeriodicTask {
    /// First run is one interval from now.
    pub fn new<F>(name: &'static str, interval: Duration, action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            name,
            interval,
            last_run: Some(Instant::now()),
            action: Box::new(action),
        }
    }

    /// Run on the first tick instead of waiting an interval.
    pub fn immediate(mut self) -> Self {
        self.last_run = None;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.is_enabled()
            && self
                .last_run
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Run the action if due. Returns whether it ran.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        (self.action)();
        self.last_run = Some(now);
        true
    }
}

struct LoopHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owns the background loops of one node.
pub struct Scheduler {
    stop: StopSignal,
    tick: Duration,
    loops: Vec<LoopHandle>,
}

impl Scheduler {
    pub fn new(stop: StopSignal) -> Self {
        Self::with_tick(stop, TICK)
    }

    pub fn with_tick(stop: StopSignal, tick: Duration) -> Self {
        Self {
            stop,
            tick,
            loops: Vec::new(),
        }
    }

    /// Start a loop thread running `tasks`.
    pub fn spawn_loop(&mut self, name: &'static str, mut tasks: Vec<PeriodicTask>) -> io::Result<()> {
        let stop = self.stop.clone();
        let tick = self.tick;

        let enabled: Vec<_> = tasks.iter().filter(|t| t.is_enabled()).map(|t| t.name).collect();
        debug!("scheduler"; "{} loop: {:?}", name, enabled);

        let handle = thread::Builder::new()
            .name(format!("{name}-loop"))
            .spawn(move || {
                while !stop.is_set() {
                    let now = Instant::now();
                    for task in &mut tasks {
                        if stop.is_set() {
                            break;
                        }
                        task.poll(now);
                    }
                    if stop.wait_timeout(tick) {
                        break;
                    }
                }
                debug!("scheduler"; "{} loop stopped", name);
            })?;

        self.loops.push(LoopHandle { name, handle });
        Ok(())
    }

    /// Signal stop and wait up to `timeout` for every loop.
    ///
    /// Returns the names of loops still running when the wait ran out.
    pub fn shutdown(self, timeout: Duration) -> Vec<&'static str> {
        self.stop.trigger();

        let deadline = Instant::now() + timeout;
        let mut pending = self.loops;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|l| l.handle.is_finished());
            for finished in finished {
                let _ = finished.handle.join();
            }
            pending = running;

            if pending.is_empty() || Instant::now() >= deadline {
                return pending.into_iter().map(|l| l.name).collect();
            }
            thread::sleep(JOIN_POLL);
        }
    }
}
