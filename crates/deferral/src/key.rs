use core::{borrow::Borrow, fmt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An opaque, caller-chosen identifier linking a pending operation to the
/// provisional actions queued against it.
///
/// The format is unconstrained; in practice it is usually a client-generated
/// UUID. Cloning is cheap since the underlying string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(Arc<str>);

impl CorrelationKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl AsRef<str> for CorrelationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CorrelationKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<CorrelationKey> for serde_json::Value {
    fn from(key: CorrelationKey) -> Self {
        Self::String(key.as_str().to_owned())
    }
}
