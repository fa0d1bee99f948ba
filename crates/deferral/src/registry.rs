use crate::{
    Action, CorrelationKey, DEFAULT_PAYLOAD_FIELD, DeferredDispatchUnit, DispatchSink, Error,
    ResolvedEntity, Result, UnitHandle,
};
use core::fmt;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

#[cfg(feature = "tracing")]
use tracing::instrument;


/// Keyed front door to a dynamic set of [`DeferredDispatchUnit`]s.
///
/// The registry owns at most one pending unit per [`CorrelationKey`], routes
/// provisional actions to it, and forgets the key as soon as the unit
/// resolves. It is an ordinary value: construct one per feature that needs
/// it and hand out clones, which all share the same state and sink.
///
/// A key is *registered* while its unit is pending. Once the unit flushes its
/// queue, [`has_key`](Self::has_key) reports `false` and
/// [`push_action`](Self::push_action) fails, even before the map entry is
/// physically removed.
///
/// # Example
/// ```
/// use deferral::{Action, DeferredDispatchRegistry, DispatchLog, ResolvedEntity};
/// use futures::channel::oneshot;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> deferral::Result<()> {
/// let log = DispatchLog::new();
/// let registry = DeferredDispatchRegistry::new(log.clone());
///
/// let (created, creation) = oneshot::channel::<ResolvedEntity>();
/// let handle = registry
///     .put("k1", creation, |entity| Action::new("CREATED").with("payload", entity))
///     .expect("first put for k1");
///
/// registry.push_action("k1", Action::new("EDIT").with("payload", json!({ "text": "hi" })))?;
///
/// created.send(ResolvedEntity::new("server-42")).unwrap();
/// handle.await?;
///
/// assert!(!registry.has_key("k1"));
/// assert_eq!(log.snapshot()[1].get("payload"), Some(&json!({ "id": "server-42", "text": "hi" })));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeferredDispatchRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    units: Mutex<HashMap<CorrelationKey, DeferredDispatchUnit>>,
    sink: Arc<dyn DispatchSink>,
}

impl DeferredDispatchRegistry {
    /// Creates an empty registry whose units all dispatch through `sink`.
    pub fn new(sink: impl DispatchSink + 'static) -> Self {
        Self::with_shared_sink(Arc::new(sink))
    }

    /// Like [`Self::new`], for a sink that is already shared elsewhere.
    pub fn with_shared_sink(sink: Arc<dyn DispatchSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                units: Mutex::new(HashMap::new()),
                sink,
            }),
        }
    }

    /// Registers a pending operation, grafting the resolved `id` into the
    /// `payload` field of the latest provisional action.
    ///
    /// See [`Self::put_with_field`].
    pub fn put<S, E, F>(
        &self,
        key: impl Into<CorrelationKey>,
        source: S,
        on_success: F,
    ) -> Option<UnitHandle>
    where
        S: Future<Output = core::result::Result<ResolvedEntity, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(ResolvedEntity) -> Action + Send + 'static,
    {
        self.put_with_field(key, source, on_success, DEFAULT_PAYLOAD_FIELD)
    }

    /// Registers a pending operation for `key`.
    ///
    /// If `key` already has a pending unit, this is a no-op returning `None`:
    /// the existing unit keeps its source and factory, and the ones passed
    /// here are dropped without being used.
    ///
    /// Otherwise a new unit starts awaiting `source` and the returned handle
    /// resolves with its outcome. Dropping the handle does not stop the unit.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn put_with_field<S, E, F>(
        &self,
        key: impl Into<CorrelationKey>,
        source: S,
        on_success: F,
        payload_field: impl Into<String>,
    ) -> Option<UnitHandle>
    where
        S: Future<Output = core::result::Result<ResolvedEntity, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(ResolvedEntity) -> Action + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::current();
        let key = key.into();

        let unit = {
            let mut units = self.inner.units.lock();
            if units.get(&key).is_some_and(DeferredDispatchUnit::is_pending) {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %key, "Ignoring put for key with a pending operation");
                return None;
            }
            let unit = DeferredDispatchUnit::new(key.clone(), payload_field);
            units.insert(key, unit.clone());
            unit
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %unit.key(), payload_field = unit.payload_field(), "Pending operation registered");

        // The map lock must be released here: a runtime that is shutting
        // down drops the task inline, which runs the removal callback.
        let registry = Arc::downgrade(&self.inner);
        Some(unit.launch(
            &runtime,
            source,
            on_success,
            Arc::clone(&self.inner.sink),
            Box::new(move |key: &CorrelationKey| remove_retired(&registry, key)),
        ))
    }

    /// Queues a provisional action for the pending operation behind `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `key` has no pending operation, either
    /// because it was never registered or because it already resolved.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(key = key.as_ref()))
    )]
    pub fn push_action(&self, key: impl AsRef<str>, action: Action) -> Result<()> {
        let key = key.as_ref();
        let units = self.inner.units.lock();
        match units.get(key) {
            Some(unit) => unit.enqueue(action),
            None => Err(Error::NotFound {
                key: CorrelationKey::new(key),
            }),
        }
    }

    /// Whether `key` currently has a pending operation.
    pub fn has_key(&self, key: impl AsRef<str>) -> bool {
        self.inner
            .units
            .lock()
            .get(key.as_ref())
            .is_some_and(DeferredDispatchUnit::is_pending)
    }

    /// Cancels the pending operation behind `key`.
    ///
    /// The unit stops waiting for its source, dispatches nothing, and its
    /// handle resolves with [`Error::Cancelled`]. Returns `false` if there is
    /// no pending operation or its source has already resolved.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(key = key.as_ref()))
    )]
    pub fn cancel(&self, key: impl AsRef<str>) -> bool {
        self.inner
            .units
            .lock()
            .get(key.as_ref())
            .is_some_and(DeferredDispatchUnit::cancel)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.inner
            .units
            .lock()
            .values()
            .filter(|unit| unit.is_pending())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all pending operations, in no particular order.
    pub fn keys(&self) -> Vec<CorrelationKey> {
        self.inner
            .units
            .lock()
            .values()
            .filter(|unit| unit.is_pending())
            .map(|unit| unit.key().clone())
            .collect()
    }
}

/// Removal callback wired into every unit.
///
/// Only drops the entry if it is retired: a later `put` may already have
/// replaced the finished unit with a fresh pending one.
fn remove_retired(registry: &Weak<Inner>, key: &CorrelationKey) {
    let Some(inner) = registry.upgrade() else {
        return;
    };
    let mut units = inner.units.lock();
    if units.get(key).is_some_and(|unit| !unit.is_pending()) {
        units.remove(key);
        #[cfg(feature = "tracing")]
        tracing::trace!(key = %key, "Pending operation removed");
    }
}

impl fmt::Debug for DeferredDispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDispatchRegistry")
            .field("units", &*self.inner.units.lock())
            .finish_non_exhaustive()
    }
}
