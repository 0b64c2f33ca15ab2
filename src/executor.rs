//! Redirecting executor
//!
//! Every scheduled operation runs as a task whose waker does not poll it
//! directly. Waking a task turns into a [`Job`] appended to the FIFO of the
//! instant the operation is bound to, and the drain loop decides when that
//! job actually runs. Tasks therefore resume strictly in
//! (instant, enqueue order), whatever thread or timer woke them.

use crate::clock::{Instant, Step};
use crate::error::BoxError;
use crate::queue::{Job, WorkQueue};
use futures::future::LocalBoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Shared scheduling state, one per group.
pub(crate) type SharedQueue = Arc<Mutex<WorkQueue>>;

/// Identifies a task within its group, in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Whether a task counts towards the group's natural completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Operation,
    Observer,
}

/// The value an operation may finish with.
///
/// Lets `add_task` accept both infallible futures and ones returning
/// `Result<(), E>`.
pub trait TaskOutcome {
    fn into_result(self) -> Result<(), BoxError>;
}

impl TaskOutcome for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> TaskOutcome for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Waker side of a task: diverts every wake into the work queue.
pub(crate) struct Redirector {
    task: TaskId,
    instant: Instant,
    /// Whether a job for this task is already queued.
    scheduled: AtomicBool,
    /// Set under the queue lock once the task has finished.
    completed: AtomicBool,
    queue: SharedQueue,
}

impl Redirector {
    fn new(task: TaskId, instant: Instant, queue: SharedQueue) -> Self {
        Self {
            task,
            instant,
            scheduled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            queue,
        }
    }

    /// Queue a job for this task unless one is queued or the task is done.
    fn redirect(&self) {
        let waiter = {
            let mut queue = self.queue.lock();
            if self.completed.load(Ordering::Acquire) {
                return;
            }
            if self.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
            queue.enqueue(Job {
                task: self.task,
                instant: self.instant,
            })
        };
        if let Some(waiter) = waiter {
            waiter.wake();
        }
    }

    /// Stop accepting wakes and release this task's hold on its instant.
    fn complete(&self) {
        let mut queue = self.queue.lock();
        self.completed.store(true, Ordering::Release);
        queue.mark_closed(self.instant);
    }
}

impl ArcWake for Redirector {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.redirect();
    }
}

struct TaskSlot {
    future: LocalBoxFuture<'static, Result<(), BoxError>>,
    redirector: Arc<Redirector>,
    kind: TaskKind,
    step: Step,
}

/// What running one job did.
pub(crate) enum JobOutcome {
    /// The task suspended again.
    Suspended,
    /// The job referred to a task that already finished.
    Stale,
    /// The task ran to completion.
    Completed {
        kind: TaskKind,
        step: Step,
        result: Result<(), BoxError>,
    },
}

/// All tasks of a group. Dropping the set cancels whatever is still running.
pub(crate) struct TaskSet {
    queue: SharedQueue,
    slots: Vec<Option<TaskSlot>>,
    live_operations: usize,
}

impl TaskSet {
    pub(crate) fn new(queue: SharedQueue) -> Self {
        Self {
            queue,
            slots: Vec::new(),
            live_operations: 0,
        }
    }

    /// Register a task bound to `step` and queue its first job.
    pub(crate) fn spawn<F>(&mut self, step: Step, kind: TaskKind, future: F) -> TaskId
    where
        F: Future<Output = Result<(), BoxError>> + 'static,
    {
        let instant = Instant::at(step);
        let task = TaskId(self.slots.len());
        let redirector = Arc::new(Redirector::new(task, instant, self.queue.clone()));

        self.queue.lock().prepare(instant);
        redirector.redirect();

        if kind == TaskKind::Operation {
            self.live_operations += 1;
        }
        self.slots.push(Some(TaskSlot {
            future: Box::pin(future),
            redirector,
            kind,
            step,
        }));
        task
    }

    /// Operations (not observers) that have not completed.
    pub(crate) fn live_operations(&self) -> usize {
        self.live_operations
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Poll the task a job refers to, once.
    pub(crate) fn run(&mut self, job: Job) -> JobOutcome {
        let poll = {
            let Some(Some(slot)) = self.slots.get_mut(job.task.0) else {
                return JobOutcome::Stale;
            };
            slot.redirector.scheduled.store(false, Ordering::Release);
            let waker = waker_ref(&slot.redirector);
            let mut cx = Context::from_waker(&waker);
            slot.future.as_mut().poll(&mut cx)
        };

        let Poll::Ready(result) = poll else {
            return JobOutcome::Suspended;
        };

        let Some(slot) = self.slots.get_mut(job.task.0).and_then(Option::take) else {
            return JobOutcome::Stale;
        };
        // Close before dropping the future so wakes from its drop glue are discarded.
        slot.redirector.complete();
        if slot.kind == TaskKind::Operation {
            self.live_operations -= 1;
        }
        let TaskSlot { future, kind, step, .. } = slot;
        drop(future);

        JobOutcome::Completed { kind, step, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Selection;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn next_job(queue: &SharedQueue) -> Option<Job> {
        match queue.lock().pop_next() {
            Selection::Run(job) => Some(job),
            _ => None,
        }
    }

    #[test]
    fn test_spawn_queues_first_job() {
        let queue: SharedQueue = Arc::new(Mutex::new(WorkQueue::new()));
        let mut tasks = TaskSet::new(queue.clone());

        let id = tasks.spawn(Step(3), TaskKind::Operation, async { Ok(()) });

        assert_eq!(tasks.live_operations(), 1);
        assert_eq!(
            next_job(&queue),
            Some(Job {
                task: id,
                instant: Instant::at(Step(3)),
            })
        );
    }

    #[test]
    fn test_wake_is_redirected_to_bound_instant() {
        let queue: SharedQueue = Arc::new(Mutex::new(WorkQueue::new()));
        let mut tasks = TaskSet::new(queue.clone());
        let (tx, rx) = futures::channel::oneshot::channel::<u32>();
        let got = Rc::new(RefCell::new(None));

        let g = got.clone();
        let id = tasks.spawn(Step(2), TaskKind::Operation, async move {
            *g.borrow_mut() = rx.await.ok();
            Ok(())
        });

        let first = next_job(&queue).map(|job| tasks.run(job));
        assert!(matches!(first, Some(JobOutcome::Suspended)));
        assert_eq!(next_job(&queue), None);

        // The send wakes the task: a job appears, nothing runs yet.
        let _ = tx.send(7);
        assert_eq!(*got.borrow(), None);

        let job = next_job(&queue);
        assert_eq!(job.map(|j| j.task), Some(id));
        let outcome = job.map(|j| tasks.run(j));
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));
        assert_eq!(*got.borrow(), Some(7));
        assert_eq!(tasks.live_operations(), 0);
    }

    #[test]
    fn test_duplicate_wakes_queue_one_job() {
        let queue: SharedQueue = Arc::new(Mutex::new(WorkQueue::new()));
        let mut tasks = TaskSet::new(queue.clone());

        tasks.spawn(Step(0), TaskKind::Operation, async {
            futures::pending!();
            Ok(())
        });
        let redirector = tasks.slots[0].as_ref().map(|s| s.redirector.clone());
        if let Some(job) = next_job(&queue) {
            tasks.run(job);
        }

        if let Some(redirector) = redirector {
            redirector.redirect();
            redirector.redirect();
        }
        assert!(next_job(&queue).is_some());
        assert_eq!(next_job(&queue), None);
    }

    #[test]
    fn test_observers_do_not_count_as_operations() {
        let queue: SharedQueue = Arc::new(Mutex::new(WorkQueue::new()));
        let mut tasks = TaskSet::new(queue);

        tasks.spawn(Step(0), TaskKind::Observer, async { Ok(()) });
        assert_eq!(tasks.live_operations(), 0);
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_result_outcome_boxes_error() {
        let ok: Result<(), std::io::Error> = Ok(());
        assert!(ok.into_result().is_ok());

        let err: Result<(), &str> = Err("boom");
        let boxed = err.into_result().err().map(|e| e.to_string());
        assert_eq!(boxed.as_deref(), Some("boom"));
    }
}
