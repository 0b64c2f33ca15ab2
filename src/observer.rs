//! Observers
//!
//! An observer watches a stream from inside a group and records what it saw,
//! stamped with the group clock. The log of each observer ends with exactly
//! one [`Event::Finished`], written when the stream ends on its own, fails,
//! or is cut off by the group's termination signal once every ordinary
//! operation has completed.

use crate::clock::{ClockReader, Instant, Step};
use crate::materialize::{materialize, Completion, Materialized};
use crate::signal::SignalWait;
use futures::future::poll_fn;
use futures::{FutureExt, StreamExt, TryStream};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;
use tracing::{trace, warn};

/// Identifies an observer within its group.
pub type ObserverId = u64;

/// One entry of an observer's log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<T> {
    Value { tick: Instant, value: T },
    Finished { tick: Instant },
}

impl<T> Event<T> {
    /// `Value` at `tick` steps from zero.
    pub fn value(tick: i64, value: T) -> Self {
        Event::Value {
            tick: Instant::at(Step(tick)),
            value,
        }
    }

    /// `Finished` at `tick` steps from zero.
    pub fn finished(tick: i64) -> Self {
        Event::Finished {
            tick: Instant::at(Step(tick)),
        }
    }

    /// When the event was recorded.
    pub fn tick(&self) -> Instant {
        match self {
            Event::Value { tick, .. } | Event::Finished { tick } => *tick,
        }
    }
}

/// Per-observer logs, keyed by observer id.
pub type ObserverLog<T> = BTreeMap<ObserverId, Vec<Event<T>>>;

/// Log storage shared by the observers of one group.
pub(crate) type SharedLog<T> = Rc<RefCell<ObserverLog<T>>>;

/// What the observer loop woke up for.
enum Wakeup<T, E> {
    Stream(Option<Materialized<T, E>>),
    Terminated,
}

/// Consume `source` until it ends or `termination` fires, logging under `id`.
///
/// Elements already available take precedence over termination, so nothing
/// delivered before the cut-off is lost.
pub(crate) async fn observe<S>(
    id: ObserverId,
    source: S,
    log: SharedLog<S::Ok>,
    clock: ClockReader,
    mut termination: SignalWait,
) where
    S: TryStream + Unpin,
    S::Error: fmt::Display,
{
    let record = |event: Event<S::Ok>| {
        log.borrow_mut().entry(id).or_default().push(event);
    };
    let mut events = materialize(source);

    loop {
        let wakeup = poll_fn(|cx| {
            if let Poll::Ready(item) = events.poll_next_unpin(cx) {
                return Poll::Ready(Wakeup::Stream(item));
            }
            termination.poll_unpin(cx).map(|_| Wakeup::Terminated)
        })
        .await;

        match wakeup {
            Wakeup::Stream(Some(Materialized::Value(value))) => {
                record(Event::Value {
                    tick: clock.now(),
                    value,
                });
            }
            Wakeup::Stream(Some(Materialized::Completed(Completion::Failure(error)))) => {
                warn!(observer = id, %error, "observed stream failed");
                break;
            }
            Wakeup::Stream(Some(Materialized::Completed(Completion::Finished)) | None) => {
                trace!(observer = id, "observed stream finished");
                break;
            }
            Wakeup::Terminated => {
                trace!(observer = id, now = %clock.now(), "observer terminated");
                break;
            }
        }
    }

    record(Event::Finished { tick: clock.now() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::signal::Signal;
    use futures::stream;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn fixed_clock(step: i64) -> ClockReader {
        let mut clock = VirtualClock::new();
        clock.advance(Step(step));
        ClockReader::new(Arc::new(Mutex::new(clock)), VirtualClock::now)
    }

    #[tokio::test]
    async fn test_finite_stream_logs_values_then_finished() {
        let log: SharedLog<u32> = Rc::new(RefCell::new(BTreeMap::new()));
        let signal = Signal::new();
        let source = stream::iter(vec![Ok::<_, String>(1), Ok(2)]);

        observe(7, source, log.clone(), fixed_clock(4), signal.wait()).await;

        assert_eq!(
            log.borrow().get(&7),
            Some(&vec![Event::value(4, 1), Event::value(4, 2), Event::finished(4)])
        );
    }

    #[tokio::test]
    async fn test_failure_ends_with_plain_finished() {
        let log: SharedLog<u32> = Rc::new(RefCell::new(BTreeMap::new()));
        let signal = Signal::new();
        let source = stream::iter(vec![Ok(1), Err("broken".to_string())]);

        observe(1, source, log.clone(), fixed_clock(0), signal.wait()).await;

        assert_eq!(
            log.borrow().get(&1),
            Some(&vec![Event::value(0, 1), Event::finished(0)])
        );
    }

    #[tokio::test]
    async fn test_termination_cuts_off_endless_stream() {
        let log: SharedLog<u32> = Rc::new(RefCell::new(BTreeMap::new()));
        let signal = Signal::new();
        signal.fire();
        let source = stream::iter(vec![Ok::<_, String>(9)]).chain(stream::pending());

        observe(2, source, log.clone(), fixed_clock(3), signal.wait()).await;

        assert_eq!(
            log.borrow().get(&2),
            Some(&vec![Event::value(3, 9), Event::finished(3)])
        );
    }

    #[test]
    fn test_event_tick() {
        assert_eq!(Event::value(5, "x").tick(), Instant::at(Step(5)));
        assert_eq!(Event::<()>::finished(2).tick(), 2);
    }
}
