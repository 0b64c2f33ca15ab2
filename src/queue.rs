//! Time-Indexed Work Queue
//!
//! Maps each instant to a FIFO of pending jobs. An instant stays open while
//! any operation bound to it is still running; once every bound operation
//! has completed the instant is closed and, when its FIFO is empty, retired.
//!
//! All state, including the virtual clock, lives behind one lock owned by the
//! group. Every method here is a short critical section that never suspends.

use crate::clock::{Instant, Step, VirtualClock};
use crate::executor::TaskId;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound::{Excluded, Included};
use std::task::Waker;
use tracing::trace;

/// One resumption of a suspended operation, destined for an instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Job {
    pub task: TaskId,
    pub instant: Instant,
}

/// Result of one selection pass over the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Run this job next.
    Run(Job),
    /// Nothing is runnable; the earliest instant that may still receive work.
    Wait(Instant),
    /// No queues remain.
    Idle,
}

#[derive(Debug, Default)]
struct InstantQueue {
    jobs: VecDeque<Job>,
    /// Operations bound here that have not completed yet.
    bound: usize,
}

impl InstantQueue {
    fn is_closed(&self) -> bool {
        self.bound == 0
    }
}

/// The group's scheduling state: clock, per-instant queues and the horizon.
#[derive(Debug, Default)]
pub struct WorkQueue {
    clock: VirtualClock,
    end: Instant,
    queues: BTreeMap<Instant, InstantQueue>,
    /// Total jobs ever enqueued. The drain compares it across a wait.
    enqueued: u64,
    /// Drain task parked in the fallback wait.
    waiter: Option<Waker>,
}

impl WorkQueue {
    /// An empty queue with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The group clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// The latest instant any operation was bound to.
    pub fn end(&self) -> Instant {
        self.end
    }

    /// Whether every instant has been retired.
    pub fn is_idle(&self) -> bool {
        self.queues.is_empty()
    }

    /// Jobs enqueued since the queue was created.
    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    /// Bind one more operation to `instant`, creating its queue on first use.
    pub fn prepare(&mut self, instant: Instant) {
        self.queues.entry(instant).or_default().bound += 1;
        if instant > self.end {
            self.end = instant;
        }
    }

    /// Append a job to its instant's FIFO.
    ///
    /// Returns the parked drain waker, if any. The caller wakes it after
    /// releasing the lock.
    ///
    /// # Panics
    /// If the instant was never prepared or is already closed. Both mean a
    /// completed operation was resumed, which the redirector rules out.
    pub fn enqueue(&mut self, job: Job) -> Option<Waker> {
        let Some(queue) = self.queues.get_mut(&job.instant) else {
            panic!("job for {:?} enqueued at unprepared instant {}", job.task, job.instant);
        };
        assert!(
            !queue.is_closed(),
            "job for {:?} enqueued at closed instant {}",
            job.task,
            job.instant
        );
        queue.jobs.push_back(job);
        self.enqueued += 1;
        self.waiter.take()
    }

    /// One operation bound to `instant` will enqueue nothing further.
    pub fn mark_closed(&mut self, instant: Instant) {
        match self.queues.get_mut(&instant) {
            Some(queue) if queue.bound > 0 => queue.bound -= 1,
            _ => panic!("instant {instant} closed more times than it was prepared"),
        }
    }

    /// Park the drain until the next enqueue.
    pub fn set_waiter(&mut self, waker: &Waker) {
        match &self.waiter {
            Some(existing) if existing.will_wake(waker) => {}
            _ => self.waiter = Some(waker.clone()),
        }
    }

    /// Select the next job in (instant, enqueue order).
    ///
    /// Scans from the earliest instant up to `end`:
    /// - a non-empty FIFO yields its head job and moves `now` up to it;
    /// - an empty, closed FIFO is retired, stepping `now` past it if `now`
    ///   sits there;
    /// - an empty, open FIFO is remembered as pending and the scan goes on,
    ///   so a slow operation cannot stall work already queued later.
    ///
    /// With no runnable job the earliest pending instant is reported.
    pub fn pop_next(&mut self) -> Selection {
        let mut pending = None;
        let mut cursor = self.first_from(None);

        while let Some(instant) = cursor {
            let Some(queue) = self.queues.get_mut(&instant) else {
                break;
            };

            if let Some(job) = queue.jobs.pop_front() {
                self.clock.advance_to(instant);
                trace!(%instant, task = ?job.task, now = %self.clock.now(), "job selected");
                return Selection::Run(job);
            }

            if queue.is_closed() {
                self.queues.remove(&instant);
                if self.clock.now() == instant {
                    self.clock.advance(Step::ONE);
                }
                trace!(%instant, now = %self.clock.now(), "instant retired");
            } else if pending.is_none() {
                pending = Some(instant);
            }

            cursor = self.first_from(Some(instant));
        }

        match pending {
            Some(instant) => Selection::Wait(instant),
            None => Selection::Idle,
        }
    }

    fn first_from(&self, after: Option<Instant>) -> Option<Instant> {
        let lower = match after {
            Some(instant) => Excluded(instant),
            None => std::ops::Bound::Unbounded,
        };
        self.queues
            .range((lower, Included(self.end)))
            .next()
            .map(|(instant, _)| *instant)
    }
}
