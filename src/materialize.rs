//! Stream helpers
//!
//! [`materialize`] lifts a fallible stream into an explicit sequence of
//! values followed by exactly one completion event. [`collect_until`] drains
//! a stream into a `Vec`, telling "cancelled before anything arrived" apart
//! from "completed with no elements".

use crate::signal::{SignalOutcome, SignalWait};
use futures::future::poll_fn;
use futures::{FutureExt, Stream, StreamExt, TryStream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// How a materialized stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion<E> {
    Finished,
    Failure(E),
}

/// One event of a materialized stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Materialized<T, E> {
    Value(T),
    Completed(Completion<E>),
}

/// Stream returned by [`materialize`].
pub struct Materialize<S> {
    inner: Option<S>,
}

/// Turn `stream` into `Value` events and a single trailing `Completed`.
pub fn materialize<S>(stream: S) -> Materialize<S>
where
    S: TryStream + Unpin,
{
    Materialize {
        inner: Some(stream),
    }
}

impl<S> Stream for Materialize<S>
where
    S: TryStream + Unpin,
{
    type Item = Materialized<S::Ok, S::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.try_poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Materialized::Value(value))),
            Poll::Ready(Some(Err(error))) => {
                this.inner = None;
                Poll::Ready(Some(Materialized::Completed(Completion::Failure(error))))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(Some(Materialized::Completed(Completion::Finished)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drain `stream` until it ends or `cancel` fires.
///
/// Returns `None` only if `cancel` fired before the first element. A
/// cancellation signal abandoned without firing is ignored.
pub async fn collect_until<S>(mut stream: S, cancel: SignalWait) -> Option<Vec<S::Item>>
where
    S: Stream + Unpin,
{
    let mut items = Vec::new();
    let mut cancel = Some(cancel);

    loop {
        let next = poll_fn(|cx| {
            if let Poll::Ready(item) = stream.poll_next_unpin(cx) {
                return Poll::Ready(Some(item));
            }
            if let Some(wait) = cancel.as_mut() {
                if let Poll::Ready(outcome) = wait.poll_unpin(cx) {
                    if outcome == SignalOutcome::Triggered {
                        return Poll::Ready(None);
                    }
                    cancel = None;
                }
            }
            Poll::Pending
        })
        .await;

        match next {
            Some(Some(item)) => items.push(item),
            Some(None) => return Some(items),
            None if items.is_empty() => return None,
            None => return Some(items),
        }
    }
}
