//! Cooperative Task Scheduler
//!
//! A timer registry that is ticked from the reactor loop instead of running
//! its own thread. Each tick fires every task whose target time has passed:
//!
//! 1. One-shot tasks fire once and are removed
//! 2. Repeating tasks are pushed to `now + period` (missed ticks are not
//!    replayed)
//! 3. A cancelled task never fires again, even if it cancelled itself
//!    from inside its own callback
//!
//! The scheduler is generic over the task payload. The manager stores
//! [`Job`](crate::connection::Job) values in it; tests use plain strings.
//!
//! ## Running Tasks That Need The Owner
//!
//! A callback often needs mutable access to whatever owns the scheduler.
//! [`Scheduler::begin`] lends the payload out while the task record stays
//! registered, and [`Scheduler::finish`] hands it back:
//!
//! ```
//! use roomwire::scheduler::Scheduler;
//! use std::time::{Duration, Instant};
//!
//! let mut scheduler = Scheduler::new();
//! let start = Instant::now();
//! let id = scheduler.schedule_at(start, Some(Duration::from_secs(1)), "ping");
//!
//! for id in scheduler.due(start) {
//!     if let Some(job) = scheduler.begin(id) {
//!         // ... run the job with full access to the owner ...
//!         scheduler.finish(id, job, start);
//!     }
//! }
//! assert!(scheduler.is_scheduled(id));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Identifies a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug)]
struct Task<T> {
    /// When the task fires next
    target: Instant,
    /// Repeat period (None = one-shot)
    period: Option<Duration>,
    /// Payload; `None` while lent out by `begin`
    payload: Option<T>,
    /// Set when cancelled while running
    cancelled: bool,
}

/// Registry of one-shot and repeating tasks.
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: HashMap<TaskId, Task<T>>,
    next_id: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedules `payload` to fire once after `delay`.
    pub fn set_timeout(&mut self, delay: Duration, payload: T) -> TaskId {
        self.schedule_at(Instant::now() + delay, None, payload)
    }

    /// Schedules `payload` to fire every `period`, first after one period.
    pub fn set_interval(&mut self, period: Duration, payload: T) -> TaskId {
        self.schedule_at(Instant::now() + period, Some(period), payload)
    }

    /// Schedules `payload` at an explicit target time.
    pub fn schedule_at(&mut self, target: Instant, period: Option<Duration>, payload: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                target,
                period,
                payload: Some(payload),
                cancelled: false,
            },
        );
        trace!(task = %id, ?period, "Task scheduled");
        id
    }

    /// Cancels a task. Returns `false` if it was not scheduled.
    ///
    /// Safe to call from inside the task's own callback.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        if task.payload.is_some() {
            self.tasks.remove(&id);
        } else {
            task.cancelled = true;
        }
        trace!(task = %id, "Task cancelled");
        true
    }

    /// True while the task is registered and not cancelled.
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_some_and(|t| !t.cancelled)
    }

    /// Ids of every task whose target time is at or before `now`, ordered
    /// by target time then creation order.
    pub fn due(&self, now: Instant) -> Vec<TaskId> {
        let mut due: Vec<(Instant, TaskId)> = self
            .tasks
            .iter()
            .filter(|(_, t)| !t.cancelled && t.payload.is_some() && t.target <= now)
            .map(|(id, t)| (t.target, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Lends out the payload of a due task.
    ///
    /// Returns `None` if the task was cancelled in the meantime.
    pub fn begin(&mut self, id: TaskId) -> Option<T> {
        let task = self.tasks.get_mut(&id)?;
        if task.cancelled {
            return None;
        }
        task.payload.take()
    }

    /// Returns a payload after running it.
    ///
    /// Repeating tasks are rescheduled at `now + period` unless cancelled;
    /// everything else is dropped.
    pub fn finish(&mut self, id: TaskId, payload: T, now: Instant) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        match task.period {
            Some(period) if !task.cancelled => {
                task.target = now + period;
                task.payload = Some(payload);
            }
            _ => {
                self.tasks.remove(&id);
            }
        }
    }

    /// Runs every due task through `run`.
    ///
    /// Returns the number of tasks fired.
    pub fn tick(&mut self, now: Instant, mut run: impl FnMut(TaskId, &mut T)) -> usize {
        let due = self.due(now);
        let mut fired = 0;
        for id in due {
            if let Some(mut payload) = self.begin(id) {
                run(id, &mut payload);
                self.finish(id, payload, now);
                fired += 1;
            }
        }
        fired
    }

    /// Earliest target time among live tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .values()
            .filter(|t| !t.cancelled)
            .map(|t| t.target)
            .min()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
