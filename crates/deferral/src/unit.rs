use crate::{Action, CorrelationKey, DispatchSink, Error, KEY_FIELD, ResolvedEntity, Result};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Invoked once when a unit is done, whatever the outcome.
pub type RemovalCallback = Box<dyn FnOnce(&CorrelationKey) + Send>;

/// Coordinates one pending creation operation against the provisional actions
/// queued for it.
///
/// Constructing a unit spawns a task that awaits the completion source. When
/// the source resolves with an entity, the unit:
///
/// 1. dispatches the success action built from the entity (with the
///    correlation key attached under `uuid`),
/// 2. retires its queue, after which [`enqueue`](Self::enqueue) fails,
/// 3. dispatches the most recently queued action with the entity's `id`
///    grafted into its payload field, if anything was queued,
/// 4. invokes the removal callback.
///
/// Earlier queued actions are superseded and never dispatched. If the source
/// fails, the unit is cancelled, or the task dies, nothing is dispatched but
/// the removal callback still runs.
#[derive(Clone)]
pub struct DeferredDispatchUnit {
    shared: Arc<Shared>,
}

struct Shared {
    key: CorrelationKey,
    payload_field: String,
    queue: Mutex<Queue>,
    cancel: CancellationToken,
}

enum Queue {
    Pending(Latest),
    /// The source has resolved; the flush has not happened yet.
    Resolving(Latest),
    Retired,
}

/// The only provisional action that can still be dispatched, plus a count of
/// the ones it replaced.
#[derive(Default)]
struct Latest {
    action: Option<Action>,
    superseded: usize,
}

impl Latest {
    fn push(&mut self, action: Action) {
        if self.action.replace(action).is_some() {
            self.superseded += 1;
        }
    }

    fn len(&self) -> usize {
        self.superseded + usize::from(self.action.is_some())
    }
}

/// What a unit did once its completion source resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// The resolved entity, as handed to the success-action factory.
    pub entity: ResolvedEntity,
    /// The rewritten latest provisional action, if one was queued.
    pub merged: Option<Action>,
    /// Number of provisional actions dropped in favor of the latest one.
    pub superseded: usize,
}

impl DeferredDispatchUnit {
    /// Creates a unit and subscribes it to `source`.
    ///
    /// # Parameters
    ///
    /// - `source`: Resolves with the created entity, or fails.
    /// - `on_success`: Builds the primary success action from the entity.
    /// - `payload_field`: The field of queued actions that receives the
    ///   resolved `id`.
    /// - `sink`: Where both dispatches go.
    /// - `on_remove`: Called exactly once when the unit finishes.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn<S, E, F>(
        key: CorrelationKey,
        source: S,
        on_success: F,
        payload_field: impl Into<String>,
        sink: Arc<dyn DispatchSink>,
        on_remove: RemovalCallback,
    ) -> (Self, UnitHandle)
    where
        S: Future<Output = core::result::Result<ResolvedEntity, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(ResolvedEntity) -> Action + Send + 'static,
    {
        let runtime = Handle::current();
        let unit = Self::new(key, payload_field);
        let handle = unit.launch(&runtime, source, on_success, sink, on_remove);
        (unit, handle)
    }

    /// A pending unit that is not subscribed to anything yet.
    pub(crate) fn new(key: CorrelationKey, payload_field: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                key,
                payload_field: payload_field.into(),
                queue: Mutex::new(Queue::Pending(Latest::default())),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Spawns the resolution task on `runtime`.
    ///
    /// If the runtime is already shutting down, the task is dropped before it
    /// ever runs and `on_remove` fires on the calling thread, so no lock the
    /// callback needs may be held here.
    pub(crate) fn launch<S, E, F>(
        &self,
        runtime: &Handle,
        source: S,
        on_success: F,
        sink: Arc<dyn DispatchSink>,
        on_remove: RemovalCallback,
    ) -> UnitHandle
    where
        S: Future<Output = core::result::Result<ResolvedEntity, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(ResolvedEntity) -> Action + Send + 'static,
    {
        let finish = Finish {
            shared: Arc::clone(&self.shared),
            on_remove: Some(on_remove),
        };
        UnitHandle {
            key: self.shared.key.clone(),
            task: runtime.spawn(run(finish, source, on_success, sink)),
        }
    }

    /// Queues a provisional action.
    ///
    /// Nothing is dispatched now. Only the most recent action queued before
    /// resolution is dispatched, once the identifier is known; older ones are
    /// dropped as soon as they are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the unit has already resolved or been
    /// torn down.
    pub fn enqueue(&self, action: Action) -> Result<()> {
        match &mut *self.shared.queue.lock() {
            Queue::Pending(latest) | Queue::Resolving(latest) => {
                latest.push(action);
                #[cfg(feature = "tracing")]
                tracing::trace!(key = %self.shared.key, queued = latest.len(), "Provisional action queued");
                Ok(())
            }
            Queue::Retired => Err(Error::NotFound {
                key: self.shared.key.clone(),
            }),
        }
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.shared.key
    }

    pub fn payload_field(&self) -> &str {
        &self.shared.payload_field
    }

    /// Whether the unit still accepts provisional actions.
    pub fn is_pending(&self) -> bool {
        !matches!(*self.shared.queue.lock(), Queue::Retired)
    }

    /// Number of provisional actions queued so far. Zero once retired.
    pub fn queued(&self) -> usize {
        match &*self.shared.queue.lock() {
            Queue::Pending(latest) | Queue::Resolving(latest) => latest.len(),
            Queue::Retired => 0,
        }
    }

    /// Stops waiting for the completion source.
    ///
    /// Queued actions are discarded, further enqueues fail, and the unit
    /// finishes with [`Error::Cancelled`] without dispatching. Returns `false`
    /// and does nothing once the source has resolved.
    pub fn cancel(&self) -> bool {
        let mut queue = self.shared.queue.lock();
        if !matches!(*queue, Queue::Pending(_)) {
            return false;
        }
        *queue = Queue::Retired;
        self.shared.cancel.cancel();
        true
    }
}

impl fmt::Debug for DeferredDispatchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDispatchUnit")
            .field("key", &self.shared.key)
            .field("payload_field", &self.shared.payload_field)
            .field("pending", &self.is_pending())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Shared {
    /// Takes the queue and refuses further actions. Idempotent.
    fn retire(&self) -> Latest {
        match core::mem::replace(&mut *self.queue.lock(), Queue::Retired) {
            Queue::Pending(latest) | Queue::Resolving(latest) => latest,
            Queue::Retired => Latest::default(),
        }
    }

    /// Marks the source as resolved so the unit can no longer be cancelled.
    /// Fails if a cancellation got there first.
    fn begin_resolving(&self) -> Result<()> {
        let mut queue = self.queue.lock();
        *queue = match core::mem::replace(&mut *queue, Queue::Retired) {
            Queue::Pending(latest) | Queue::Resolving(latest) => Queue::Resolving(latest),
            Queue::Retired => {
                return Err(Error::Cancelled {
                    key: self.key.clone(),
                });
            }
        };
        Ok(())
    }

    fn resolve<F>(
        &self,
        mut entity: ResolvedEntity,
        on_success: F,
        sink: &dyn DispatchSink,
    ) -> Result<Resolution>
    where
        F: FnOnce(ResolvedEntity) -> Action,
    {
        self.begin_resolving()?;
        let Some(id) = entity.id().cloned() else {
            return Err(Error::MissingIdentifier {
                key: self.key.clone(),
            });
        };
        entity.insert(KEY_FIELD, self.key.clone().into());

        sink.dispatch(on_success(entity.clone()));

        let Latest { action, superseded } = self.retire();
        let merged = action.map(|latest| latest.with_identifier(&self.payload_field, &id));

        #[cfg(feature = "tracing")]
        tracing::debug!(
            key = %self.key,
            id = %id,
            merged = merged.is_some(),
            superseded,
            "Pending operation resolved"
        );

        if let Some(action) = &merged {
            sink.dispatch(action.clone());
        }

        Ok(Resolution {
            entity,
            merged,
            superseded,
        })
    }
}

/// Retires the unit and fires the removal callback when the resolution task
/// ends, including when it panics or is dropped by the runtime.
struct Finish {
    shared: Arc<Shared>,
    on_remove: Option<RemovalCallback>,
}

impl Drop for Finish {
    fn drop(&mut self) {
        let _dropped = self.shared.retire();
        #[cfg(feature = "tracing")]
        if _dropped.len() > 0 {
            tracing::debug!(
                key = %self.shared.key,
                dropped = _dropped.len(),
                "Discarding provisional actions of unresolved operation"
            );
        }
        if let Some(on_remove) = self.on_remove.take() {
            on_remove(&self.shared.key);
        }
    }
}

async fn run<S, E, F>(
    finish: Finish,
    source: S,
    on_success: F,
    sink: Arc<dyn DispatchSink>,
) -> Result<Resolution>
where
    S: Future<Output = core::result::Result<ResolvedEntity, E>>,
    E: fmt::Display + Send + 'static,
    F: FnOnce(ResolvedEntity) -> Action,
{
    let shared = Arc::clone(&finish.shared);
    let key = &shared.key;

    let resolved = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => Err(Error::Cancelled { key: key.clone() }),
        res = source => res.map_err(|e| Error::Upstream {
            key: key.clone(),
            reason: e.to_string(),
        }),
    };

    let outcome = resolved.and_then(|entity| shared.resolve(entity, on_success, sink.as_ref()));

    #[cfg(feature = "tracing")]
    if let Err(e) = &outcome {
        tracing::warn!(key = %key, "Pending operation ended without dispatch: {e}");
    }

    drop(finish);
    outcome
}

/// Resolves with the terminal outcome of a unit.
///
/// Dropping the handle does not affect the unit; it still resolves and
/// dispatches on its own.
#[must_use = "dropping the handle detaches from the outcome; the unit still runs"]
pub struct UnitHandle {
    key: CorrelationKey,
    task: JoinHandle<Result<Resolution>>,
}

impl UnitHandle {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Whether the unit has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for UnitHandle {
    type Output = Result<Resolution>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => Poll::Ready(Err(Error::TaskAborted {
                key: this.key.clone(),
                context: e.to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("key", &self.key)
            .field("finished", &self.is_finished())
            .finish()
    }
}
