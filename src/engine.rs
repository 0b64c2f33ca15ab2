//! Drain engine
//!
//! Runs a group's jobs one at a time in (instant, enqueue order) until no
//! queue remains. When nothing is runnable because every operation is
//! suspended on something else, the engine parks until any wake produces a
//! new job instead of spinning or skipping ahead. The first time it parks
//! after all ordinary operations have finished, it fires the termination
//! signal so observers of endless streams can wind down.

use crate::clock::{ClockReader, Step};
use crate::config::GroupConfig;
use crate::error::{BoxError, GroupError, Result};
use crate::executor::{JobOutcome, SharedQueue, TaskId, TaskKind, TaskSet};
use crate::queue::{Job, Selection, WorkQueue};
use crate::signal::{Signal, SignalWait};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, trace};

/// Owns a group's queue, tasks and termination signal, and drains them.
pub(crate) struct DrainEngine {
    queue: SharedQueue,
    tasks: TaskSet,
    termination: Signal,
    job_limit: Option<usize>,
    yield_interval: usize,
    jobs_run: usize,
}

impl DrainEngine {
    pub(crate) fn new(config: &GroupConfig) -> Self {
        let queue: SharedQueue = Arc::new(Mutex::new(WorkQueue::new()));
        Self {
            tasks: TaskSet::new(queue.clone()),
            queue,
            termination: Signal::new(),
            job_limit: config.job_limit,
            yield_interval: config.yield_interval.max(1),
            jobs_run: 0,
        }
    }

    /// Register a future bound to `step`. Its first job is queued at once.
    pub(crate) fn spawn<F>(&mut self, step: Step, kind: TaskKind, future: F) -> TaskId
    where
        F: Future<Output = std::result::Result<(), BoxError>> + 'static,
    {
        let task = self.tasks.spawn(step, kind, future);
        trace!(%task, %step, ?kind, "task registered");
        task
    }

    /// A wait that resolves when the termination signal fires.
    pub(crate) fn termination(&self) -> SignalWait {
        self.termination.wait()
    }

    /// Read-only view of the clock shared with the queue.
    pub(crate) fn clock(&self) -> ClockReader {
        ClockReader::new(self.queue.clone(), WorkQueue::now)
    }

    /// Tasks registered so far, finished or not.
    pub(crate) fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Jobs run by the current drain.
    pub(crate) fn jobs_run(&self) -> usize {
        self.jobs_run
    }

    /// Run jobs until every queue is retired.
    ///
    /// Stops at the first failing operation; the remaining tasks are
    /// cancelled when the engine is dropped.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        loop {
            let (selection, seen) = {
                let mut queue = self.queue.lock();
                (queue.pop_next(), queue.enqueued())
            };

            match selection {
                Selection::Run(job) => {
                    self.run(job)?;
                    if self.jobs_run % self.yield_interval == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Selection::Wait(earliest) => {
                    if self.tasks.live_operations() == 0 && !self.termination.is_fired() {
                        debug!(now = %self.queue.lock().now(), "operations done, terminating observers");
                        self.termination.fire();
                        continue;
                    }
                    trace!(%earliest, "no runnable job, waiting for a wake");
                    JobAvailable {
                        queue: &self.queue,
                        seen,
                    }
                    .await;
                }
                Selection::Idle => {
                    let queue = self.queue.lock();
                    assert!(queue.is_idle(), "drain went idle with queues left");
                    debug!(jobs = self.jobs_run, now = %queue.now(), end = %queue.end(), "drain finished");
                    return Ok(());
                }
            }
        }
    }

    fn run(&mut self, job: Job) -> Result<()> {
        self.jobs_run += 1;
        if let Some(limit) = self.job_limit.filter(|&limit| self.jobs_run > limit) {
            return Err(GroupError::JobLimitExceeded(limit));
        }

        match self.tasks.run(job) {
            JobOutcome::Suspended => Ok(()),
            JobOutcome::Stale => {
                trace!(task = %job.task, "stale job skipped");
                Ok(())
            }
            JobOutcome::Completed { kind, step, result } => {
                trace!(task = %job.task, ?kind, %step, "task completed");
                result.map_err(|source| {
                    debug!(task = %job.task, %step, error = %source, "operation failed");
                    GroupError::Operation { step, source }
                })
            }
        }
    }
}

/// Resolves once the queue has seen an enqueue since `seen`.
struct JobAvailable<'a> {
    queue: &'a SharedQueue,
    seen: u64,
}

impl Future for JobAvailable<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut queue = self.queue.lock();
        if queue.enqueued() != self.seen {
            return Poll::Ready(());
        }
        queue.set_waiter(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_drain_empty_engine() {
        let mut engine = DrainEngine::new(&GroupConfig::default());
        assert!(engine.drain().await.is_ok());
        assert_eq!(engine.jobs_run(), 0);
    }

    #[tokio::test]
    async fn test_drain_runs_in_step_order() {
        let mut engine = DrainEngine::new(&GroupConfig::default());
        let out = Rc::new(RefCell::new(Vec::new()));

        for step in [3, 1, 2] {
            let out = out.clone();
            engine.spawn(Step(step), TaskKind::Operation, async move {
                out.borrow_mut().push(step);
                Ok(())
            });
        }

        assert!(engine.drain().await.is_ok());
        assert_eq!(*out.borrow(), vec![1, 2, 3]);
        assert_eq!(engine.task_count(), 3);
        assert_eq!(engine.clock().now(), 4);
    }

    #[tokio::test]
    async fn test_drain_reports_first_failure() {
        let mut engine = DrainEngine::new(&GroupConfig::default());
        engine.spawn(Step(2), TaskKind::Operation, async { Err("second".into()) });
        engine.spawn(Step(1), TaskKind::Operation, async { Err("first".into()) });

        let err = engine.drain().await.err();
        match err {
            Some(GroupError::Operation { step, source }) => {
                assert_eq!(step, Step(1));
                assert_eq!(source.to_string(), "first");
            }
            other => panic!("expected operation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_job_limit_stops_runaway_task() {
        let config = GroupConfig {
            job_limit: Some(10),
            ..Default::default()
        };
        let mut engine = DrainEngine::new(&config);
        engine.spawn(Step(0), TaskKind::Operation, async {
            for _ in 0.. {
                tokio::task::yield_now().await;
            }
            Ok(())
        });

        let err = engine.drain().await.err();
        assert!(matches!(err, Some(GroupError::JobLimitExceeded(10))));
    }

    #[tokio::test]
    async fn test_termination_fires_after_operations() {
        let mut engine = DrainEngine::new(&GroupConfig::default());
        let wait = engine.termination();
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        engine.spawn(Step(0), TaskKind::Observer, async move {
            *s.borrow_mut() = Some(wait.await);
            Ok(())
        });
        engine.spawn(Step(1), TaskKind::Operation, async { Ok(()) });

        assert!(engine.drain().await.is_ok());
        assert_eq!(*seen.borrow(), Some(crate::signal::SignalOutcome::Triggered));
        assert!(engine.termination().is_triggered());
    }
}
