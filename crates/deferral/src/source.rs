//! Completion sources.
//!
//! A completion source is anything that eventually produces a single
//! [`ResolvedEntity`] (or fails). Any `Future<Output = Result<ResolvedEntity,
//! E>>` qualifies directly. Multi-shot producers, such as a subscription that
//! keeps emitting updates for the created entity, are adapted with
//! [`FirstEmission`]: only the first emission is observed and the stream is
//! dropped afterwards.

use crate::ResolvedEntity;
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use pin_project_lite::pin_project;

/// Failure of a stream-backed completion source.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError<E> {
    /// The stream yielded an error as its first item.
    #[error("{0}")]
    Failed(E),

    /// The stream ended without emitting anything.
    #[error("Completion source closed without resolving")]
    Closed,
}

pin_project! {
    /// A future that resolves with the first item of a stream.
    ///
    /// Subsequent emissions are never polled for; the stream is dropped
    /// together with this future.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct FirstEmission<S> {
        #[pin]
        stream: S,
    }
}

impl<S> FirstEmission<S> {
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, E> Future for FirstEmission<S>
where
    S: Stream<Item = Result<ResolvedEntity, E>>,
{
    type Output = Result<ResolvedEntity, SourceError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.stream.poll_next(cx) {
            Poll::Ready(Some(Ok(entity))) => Poll::Ready(Ok(entity)),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(SourceError::Failed(e))),
            Poll::Ready(None) => Poll::Ready(Err(SourceError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> fmt::Debug for FirstEmission<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstEmission").finish_non_exhaustive()
    }
}

/// Adapts a multi-shot stream into a one-shot completion source.
///
/// ```
/// use deferral::{first_emission, ResolvedEntity, SourceError};
/// use futures::{executor::block_on, stream};
///
/// let updates = stream::iter([
///     Ok::<_, String>(ResolvedEntity::new("server-1")),
///     Ok(ResolvedEntity::new("server-2")),
/// ]);
/// let entity = block_on(first_emission(updates)).unwrap();
/// assert_eq!(entity.id().and_then(|id| id.as_str()), Some("server-1"));
///
/// let empty = stream::empty::<Result<ResolvedEntity, String>>();
/// assert_eq!(block_on(first_emission(empty)), Err(SourceError::Closed));
/// ```
pub const fn first_emission<S, E>(stream: S) -> FirstEmission<S>
where
    S: Stream<Item = Result<ResolvedEntity, E>>,
{
    FirstEmission::new(stream)
}
