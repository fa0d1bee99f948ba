use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding an action's discriminator.
pub const TYPE_FIELD: &str = "type";

/// Field of a [`ResolvedEntity`] holding its durable identifier. Also the
/// field the identifier is grafted under inside an action's payload.
pub const ID_FIELD: &str = "id";

/// Field the correlation key is stored under in a [`ResolvedEntity`] before
/// it is handed to the success-action factory.
pub const KEY_FIELD: &str = "uuid";

/// Payload field used when none is configured.
pub const DEFAULT_PAYLOAD_FIELD: &str = "payload";

/// A dispatchable action.
///
/// Actions are plain JSON objects: a `type` discriminator plus any number of
/// fields. Keeping the shape open lets the identifier merge target whichever
/// field a unit was configured with.
///
/// ```
/// use deferral::Action;
/// use serde_json::json;
///
/// let edit = Action::new("EDIT").with("payload", json!({ "id": "tmp-1", "text": "hi" }));
/// let merged = edit.with_identifier("payload", &json!("server-42"));
///
/// assert_eq!(merged.get("payload"), Some(&json!({ "id": "server-42", "text": "hi" })));
/// assert_eq!(merged.kind(), Some("EDIT"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action {
    fields: Map<String, Value>,
}

impl Action {
    /// Creates an action with the given `type` and no other fields.
    pub fn new(kind: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_owned(), Value::String(kind.into()));
        Self { fields }
    }

    /// Builder-style field setter. Replaces any previous value.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// The action's `type`, if it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Returns a copy of this action whose `field` is the shallow merge of its
    /// current contents with `{ "id": id }`.
    ///
    /// Keys other than `id` survive untouched. When `field` is missing or is
    /// not an object, it is replaced by `{ "id": id }`.
    #[must_use]
    pub fn with_identifier(&self, field: &str, id: &Value) -> Self {
        let mut merged = self.clone();
        match merged.fields.get_mut(field) {
            Some(Value::Object(payload)) => {
                payload.insert(ID_FIELD.to_owned(), id.clone());
            }
            _ => {
                let mut payload = Map::new();
                payload.insert(ID_FIELD.to_owned(), id.clone());
                merged
                    .fields
                    .insert(field.to_owned(), Value::Object(payload));
            }
        }
        merged
    }
}

impl From<Map<String, Value>> for Action {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Action {
    type Error = Value;

    /// Accepts JSON objects; anything else is handed back unchanged.
    fn try_from(value: Value) -> core::result::Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(other),
        }
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        Self::Object(action.fields)
    }
}

/// The value a completion source produces once the creation operation
/// finishes.
///
/// It must carry a durable identifier under `id`. Before the success-action
/// factory sees it, the unit adds the correlation key under `uuid`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedEntity {
    fields: Map<String, Value>,
}

impl ResolvedEntity {
    /// Creates an entity holding only the given identifier.
    pub fn new(id: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_owned(), id.into());
        Self { fields }
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// The durable identifier. `null` counts as missing.
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD).filter(|id| !id.is_null())
    }

    /// The correlation key, once the unit has attached it.
    pub fn key(&self) -> Option<&str> {
        self.fields.get(KEY_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub(crate) fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_owned(), value);
    }
}

impl From<Map<String, Value>> for ResolvedEntity {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for ResolvedEntity {
    type Error = Value;

    fn try_from(value: Value) -> core::result::Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(other),
        }
    }
}

impl From<ResolvedEntity> for Value {
    fn from(entity: ResolvedEntity) -> Self {
        Self::Object(entity.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(value: Value) -> Action {
        Action::try_from(value).unwrap()
    }

    #[test]
    fn merge_overwrites_id_and_keeps_other_fields() {
        let edit = action(json!({
            "type": "EDIT",
            "meta": { "optimistic": true },
            "payload": { "id": "tmp-1", "text": "second", "tags": ["a"] }
        }));

        let merged = edit.with_identifier("payload", &json!("server-42"));

        assert_eq!(
            Value::from(merged),
            json!({
                "type": "EDIT",
                "meta": { "optimistic": true },
                "payload": { "id": "server-42", "text": "second", "tags": ["a"] }
            })
        );
        // The source action is left as it was.
        assert_eq!(edit.get("payload").unwrap()["id"], "tmp-1");
    }

    #[test]
    fn merge_targets_the_configured_field_only() {
        let edit = action(json!({
            "type": "MOVE",
            "payload": { "id": "tmp-1" },
            "target": { "folder": "inbox" }
        }));

        let merged = edit.with_identifier("target", &json!(7));

        assert_eq!(merged.get("payload"), Some(&json!({ "id": "tmp-1" })));
        assert_eq!(merged.get("target"), Some(&json!({ "folder": "inbox", "id": 7 })));
    }

    #[test]
    fn merge_replaces_missing_or_scalar_payloads() {
        let bare = Action::new("TOUCH");
        assert_eq!(
            bare.with_identifier("payload", &json!("s-1")).get("payload"),
            Some(&json!({ "id": "s-1" }))
        );

        let scalar = Action::new("TOUCH").with("payload", "oops");
        assert_eq!(
            scalar.with_identifier("payload", &json!("s-1")).get("payload"),
            Some(&json!({ "id": "s-1" }))
        );
    }

    #[test]
    fn non_objects_are_rejected() {
        assert_eq!(Action::try_from(json!([1, 2])), Err(json!([1, 2])));
        assert_eq!(ResolvedEntity::try_from(json!("id")), Err(json!("id")));
    }

    #[test]
    fn null_id_counts_as_missing() {
        let entity = ResolvedEntity::try_from(json!({ "id": null, "name": "x" })).unwrap();
        assert!(entity.id().is_none());
        assert_eq!(ResolvedEntity::new(42).id(), Some(&json!(42)));
    }

    #[test]
    fn actions_serialize_as_plain_objects() {
        let action = Action::new("EDIT").with("payload", json!({ "text": "hi" }));
        let encoded = serde_json::to_value(&action).unwrap();
        assert_eq!(encoded, json!({ "type": "EDIT", "payload": { "text": "hi" } }));
        let decoded: Action = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, action);
    }
}
