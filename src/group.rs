//! Groups
//!
//! The user-facing API. Register operations (and, on an [`ObserverGroup`],
//! observers) bound to logical steps, then `start` the group once. Starting
//! drains every job in virtual-time order, optionally racing a wall-clock
//! timeout, and cancels whatever is still running when it returns.

use crate::clock::{ClockReader, Step};
use crate::config::GroupConfig;
use crate::engine::DrainEngine;
use crate::error::{GroupError, Result};
use crate::executor::{TaskKind, TaskOutcome};
use crate::observer::{observe, ObserverId, ObserverLog, SharedLog};
use futures::{Stream, StreamExt, TryStream, TryStreamExt};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

/// Create a group of plain operations. `None` means no timeout.
pub fn create_group(timeout: Option<Duration>) -> TaskGroup {
    TaskGroup::with_config(GroupConfig {
        timeout,
        ..Default::default()
    })
}

/// Create a group that also records observers of `T` streams.
pub fn create_observer_group<T: 'static>(timeout: Option<Duration>) -> ObserverGroup<T> {
    ObserverGroup::with_config(GroupConfig {
        timeout,
        ..Default::default()
    })
}

/// Drain `engine`, racing the configured timeout if there is one.
///
/// The engine is dropped on return, cancelling every task still alive.
async fn run_guarded(mut engine: DrainEngine, config: &GroupConfig) -> Result<()> {
    debug!(tasks = engine.task_count(), timeout = ?config.timeout, "group starting");

    let result = match config.timeout {
        Some(limit) => {
            let outcome = tokio::time::timeout(limit, engine.drain()).await;
            outcome.unwrap_or_else(|_| {
                debug!(?limit, jobs = engine.jobs_run(), "group timed out");
                Err(GroupError::Timeout(limit))
            })
        }
        None => engine.drain().await,
    };

    drop(engine);
    result
}

/// A group of fire-and-forget operations.
pub struct TaskGroup {
    engine: DrainEngine,
    config: GroupConfig,
}

impl TaskGroup {
    /// An empty group using `config`.
    pub fn with_config(config: GroupConfig) -> Self {
        Self {
            engine: DrainEngine::new(&config),
            config,
        }
    }

    /// Register `operation` to run at `step`.
    ///
    /// Nothing runs until [`start`](Self::start). Operations bound to the same
    /// step run in registration order.
    pub fn add_task<F>(&mut self, step: impl Into<Step>, operation: F)
    where
        F: Future + 'static,
        F::Output: TaskOutcome,
    {
        spawn_operation(&mut self.engine, step.into(), operation);
    }

    /// Read-only view of the group clock.
    pub fn clock(&self) -> ClockReader {
        self.engine.clock()
    }

    /// Run every operation to completion.
    pub async fn start(self) -> Result<()> {
        run_guarded(self.engine, &self.config).await
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("tasks", &self.engine.task_count())
            .field("config", &self.config)
            .finish()
    }
}

fn spawn_operation<F>(engine: &mut DrainEngine, step: Step, operation: F)
where
    F: Future + 'static,
    F::Output: TaskOutcome,
{
    engine.spawn(step, TaskKind::Operation, async move {
        operation.await.into_result()
    });
}

/// A group of operations plus observers recording `T` values.
pub struct ObserverGroup<T> {
    engine: DrainEngine,
    config: GroupConfig,
    log: SharedLog<T>,
}

impl<T: 'static> ObserverGroup<T> {
    /// An empty observer group using `config`.
    pub fn with_config(config: GroupConfig) -> Self {
        Self {
            engine: DrainEngine::new(&config),
            config,
            log: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Register `operation` to run at `step`.
    pub fn add_task<F>(&mut self, step: impl Into<Step>, operation: F)
    where
        F: Future + 'static,
        F::Output: TaskOutcome,
    {
        spawn_operation(&mut self.engine, step.into(), operation);
    }

    /// Watch the stream built by `source`, starting at `step`.
    ///
    /// `source` is called when the observer first runs. Observers sharing an
    /// id append to the same log.
    pub fn add_observer<S, F>(&mut self, step: impl Into<Step>, id: ObserverId, source: F)
    where
        F: FnOnce() -> S + 'static,
        S: Stream<Item = T> + 'static,
    {
        self.add_try_observer(step, id, move || source().map(Ok::<T, Infallible>));
    }

    /// Like [`add_observer`](Self::add_observer) for fallible streams.
    ///
    /// A failure ends the observation with a plain `Finished` event.
    pub fn add_try_observer<S, F>(&mut self, step: impl Into<Step>, id: ObserverId, source: F)
    where
        F: FnOnce() -> S + 'static,
        S: TryStream<Ok = T> + 'static,
        S::Error: fmt::Display,
    {
        let log = self.log.clone();
        let clock = self.engine.clock();
        let termination = self.engine.termination();
        log.borrow_mut().entry(id).or_default();

        self.engine.spawn(step.into(), TaskKind::Observer, async move {
            let stream = Box::pin(source().into_stream());
            observe(id, stream, log, clock, termination).await;
            Ok(())
        });
    }

    /// Read-only view of the group clock.
    pub fn clock(&self) -> ClockReader {
        self.engine.clock()
    }

    /// Run every operation and observer; return each observer's log.
    pub async fn start(self) -> Result<ObserverLog<T>> {
        let Self {
            engine,
            config,
            log,
        } = self;
        run_guarded(engine, &config).await?;
        let snapshot = std::mem::take(&mut *log.borrow_mut());
        Ok(snapshot)
    }
}

impl<T> fmt::Debug for ObserverGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverGroup")
            .field("tasks", &self.engine.task_count())
            .field("observers", &self.log.borrow().len())
            .field("config", &self.config)
            .finish()
    }
}
