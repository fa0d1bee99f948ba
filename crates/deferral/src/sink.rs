use crate::Action;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The collaborator every unit dispatches through.
///
/// A sink is supplied once to the registry and shared by all of its units.
/// `dispatch` is called synchronously from the resolution task and must not
/// block; it is never called while a registry or unit lock is held, so it may
/// freely call back into the registry.
pub trait DispatchSink: Send + Sync {
    fn dispatch(&self, action: Action);
}

impl<F> DispatchSink for F
where
    F: Fn(Action) + Send + Sync,
{
    fn dispatch(&self, action: Action) {
        self(action)
    }
}

/// Forwards dispatched actions to an async consumer.
///
/// Actions dispatched after the receiver is dropped are discarded.
impl DispatchSink for mpsc::UnboundedSender<Action> {
    fn dispatch(&self, action: Action) {
        if let Err(_e) = self.send(action) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Dispatch receiver closed, dropping {:?}", _e.0.kind());
        }
    }
}

/// A sink that records every dispatched action in order.
///
/// Handy as the sink of record in tests and for auditing the dispatch order
/// of a run. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct DispatchLog {
    actions: Arc<Mutex<Vec<Action>>>,
}

impl DispatchLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything dispatched so far.
    pub fn snapshot(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    /// Removes and returns everything dispatched so far.
    pub fn drain(&self) -> Vec<Action> {
        core::mem::take(&mut *self.actions.lock())
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }
}

impl DispatchSink for DispatchLog {
    fn dispatch(&self, action: Action) {
        self.actions.lock().push(action);
    }
}
