//! Named task scheduler.
//!
//! Owns one callback per name, each either periodic or one-shot. Nothing
//! here runs on its own: the owner asks for [`TaskScheduler::due`] names,
//! checks a callback out, runs it with whatever context it needs, and checks
//! it back in. A task that cancels itself (or is replaced) while checked out
//! is simply not restored.
//!
//! Time is always passed in, so the scheduler is deterministic under test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("a task named '{0}' is already registered")]
    DuplicateTask(String),
}

struct Entry<F> {
    /// `None` while checked out.
    callback: Option<F>,
    /// `None` for one-shot tasks.
    interval: Option<Duration>,
    deadline: Instant,
    generation: u64,
}

/// A callback taken out of the scheduler to be run.
pub struct Checkout<F> {
    pub generation: u64,
    pub callback: F,
}

pub struct TaskScheduler<F> {
    tasks: HashMap<String, Entry<F>>,
    next_generation: u64,
}

impl<F> Default for TaskScheduler<F> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<F> TaskScheduler<F> {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Run `callback` every `interval`. With `run_immediately` the first run
    /// is due at `now`, otherwise at `now + interval`.
    pub fn register_periodic(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        run_immediately: bool,
        now: Instant,
        callback: F,
    ) -> Result<(), SchedulerError> {
        let deadline = if run_immediately { now } else { now + interval };
        self.insert(name.into(), Some(interval), deadline, callback)
    }

    /// Run `callback` once, `delay` from `now`.
    pub fn register_delayed(
        &mut self,
        name: impl Into<String>,
        delay: Duration,
        now: Instant,
        callback: F,
    ) -> Result<(), SchedulerError> {
        self.insert(name.into(), None, now + delay, callback)
    }

    fn insert(
        &mut self,
        name: String,
        interval: Option<Duration>,
        deadline: Instant,
        callback: F,
    ) -> Result<(), SchedulerError> {
        if self.tasks.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        self.next_generation += 1;
        self.tasks.insert(
            name,
            Entry {
                callback: Some(callback),
                interval,
                deadline,
                generation: self.next_generation,
            },
        );
        Ok(())
    }

    // ── Cancellation ─────────────────────────────────────────────────────────

    /// Cancel `name`. Returns whether anything was registered under it.
    /// Cancelling an unknown or already-cancelled task is a no-op.
    pub fn cancel(&mut self, name: &str) -> bool {
        self.tasks.remove(name).is_some()
    }

    /// Cancel everything. Returns how many tasks were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn is_pending(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Earliest deadline of any task not currently checked out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .values()
            .filter(|e| e.callback.is_some())
            .map(|e| e.deadline)
            .min()
    }

    /// Names of tasks due at `now`, earliest deadline first. Ties break on
    /// name so the order is stable.
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<_> = self
            .tasks
            .iter()
            .filter(|(_, e)| e.callback.is_some() && e.deadline <= now)
            .map(|(name, e)| (e.deadline, name.clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, name)| name).collect()
    }

    // ── Running ──────────────────────────────────────────────────────────────

    /// Take the callback for `name` if it is due.
    ///
    /// Periodic tasks stay registered with their next deadline set to
    /// `now + interval`; one-shot tasks are removed.
    pub fn checkout(&mut self, name: &str, now: Instant) -> Option<Checkout<F>> {
        let entry = self.tasks.get_mut(name)?;
        if entry.deadline > now {
            return None;
        }
        let callback = entry.callback.take()?;
        let generation = entry.generation;
        match entry.interval {
            Some(interval) => entry.deadline = now + interval,
            None => {
                self.tasks.remove(name);
            }
        }
        Some(Checkout {
            generation,
            callback,
        })
    }

    /// Return a callback after running it. Dropped if the task was cancelled,
    /// was one-shot, or has been replaced by a new registration.
    pub fn checkin(&mut self, name: &str, generation: u64, callback: F) {
        if let Some(entry) = self.tasks.get_mut(name) {
            if entry.generation == generation && entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }
}
