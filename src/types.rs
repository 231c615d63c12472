//! Core types for the sync engine.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Client-supplied (or server-derived) match parameters.
pub type Params = serde_json::Map<String, Value>;

/// Field carrying an explicit revision counter.
pub const REVISION_FIELD: &str = "revision";

/// Fallback field used when a record has no revision.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Removal marker stamped by `notify_removal`.
pub const REMOVAL_FIELD: &str = "remove";

/// Separator used when deriving a key from a composite id.
const COMPOSITE_KEY_SEPARATOR: &str = "-";

/// Opaque subscription token.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Generate a fresh, globally unique id.
    pub fn generate() -> Self {
        SubscriptionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        SubscriptionId(s.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        SubscriptionId(s)
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a connection, stable for the connection's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock time in milliseconds since the epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Verified caller identity, as handed in by the session layer.
///
/// Both `id` and `tenant_id` are required by the engine; an identity missing
/// either is rejected as a defect in the calling adapter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Name used in log lines.
    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.id)
    }

    /// The ownership pair of this identity.
    pub fn owner(&self) -> Result<Owner> {
        if self.id.is_empty() || self.tenant_id.is_empty() {
            return Err(SyncError::Defect("tenantId or userId is null".to_string()));
        }
        Ok(Owner {
            user_id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
        })
    }
}

/// The user + tenant pair that owns a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    pub user_id: String,
    pub tenant_id: String,
}

/// Canonical record identity used as the delta-queue key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    /// Derive the key from a record's `id` value.
    ///
    /// Scalars map to their textual form; an object id maps to its field
    /// values joined in key order.
    pub fn from_id(id: &Value) -> Result<Self> {
        let key = match id {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::Object(fields) if fields.is_empty() => None,
            Value::Object(fields) => Some(
                fields
                    .values()
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(COMPOSITE_KEY_SEPARATOR),
            ),
            other => Some(scalar_text(other)),
        };
        key.map(RecordKey).ok_or_else(|| {
            SyncError::DataContract(
                "Object with no id cannot be synchronized. This is a requirement.".to_string(),
            )
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Comparable version marker of a record.
///
/// Numbers compare numerically, text (e.g. ISO-8601 timestamps) compares
/// lexically, and any number sorts before any text.
#[derive(Clone, Debug)]
pub enum Revision {
    Number(f64),
    Text(String),
}

impl Revision {
    /// Read the revision of a record: `revision` if present, else `timestamp`.
    pub fn of(record: &serde_json::Map<String, Value>) -> Result<Option<Revision>> {
        for field in [REVISION_FIELD, TIMESTAMP_FIELD] {
            match record.get(field) {
                None | Some(Value::Null) => continue,
                Some(value) => return Revision::from_value(value).map(Some),
            }
        }
        Ok(None)
    }

    fn from_value(value: &Value) -> Result<Revision> {
        match value {
            Value::Number(n) => n.as_f64().map(Revision::Number).ok_or_else(|| {
                SyncError::DataContract(format!("Revision {} is not representable", n))
            }),
            Value::String(s) => Ok(Revision::Text(s.clone())),
            other => Err(SyncError::DataContract(format!(
                "Unsupported revision value: {}",
                other
            ))),
        }
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Revision::Number(a), Revision::Number(b)) => a.total_cmp(b),
            (Revision::Text(a), Revision::Text(b)) => a.cmp(b),
            (Revision::Number(_), Revision::Text(_)) => Ordering::Less,
            (Revision::Text(_), Revision::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Revision {}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Number(n) => write!(f, "{}", n),
            Revision::Text(s) => write!(f, "{}", s),
        }
    }
}

/// An application record normalized at the ingestion boundary.
///
/// The payload is kept as-is for delivery; `key` and `revision` are derived
/// once so the queue never re-inspects the JSON.
#[derive(Clone, Debug)]
pub struct SyncRecord {
    key: RecordKey,
    revision: Revision,
    value: Value,
}

impl SyncRecord {
    /// Normalize a changed record. Requires an id and a revision or timestamp.
    pub fn from_value(value: Value) -> Result<Self> {
        let fields = as_object(&value)?;
        let key = RecordKey::from_id(fields.get("id").unwrap_or(&Value::Null))?;
        let revision = Revision::of(fields)?.ok_or_else(|| {
            SyncError::DataContract(format!(
                "A revision or timestamp property is required in records to be synced (id {})",
                key
            ))
        })?;
        Ok(Self {
            key,
            revision,
            value,
        })
    }

    /// Normalize a record returned by a fetch function.
    ///
    /// Fetched records without any revision are stamped with `timestamp = 0`.
    pub fn from_fetched(mut value: Value) -> Result<Self> {
        let fields = as_object(&value)?;
        if Revision::of(fields)?.is_none() {
            if let Value::Object(fields) = &mut value {
                fields.insert(TIMESTAMP_FIELD.to_string(), Value::from(0));
            }
        }
        Self::from_value(value)
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up a top-level field of the record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }
}

fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        SyncError::DataContract(format!("Record must be an object, got {}", value))
    })
}

/// Message pushed to the client on every emission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Publication name.
    pub name: String,
    pub subscription_id: SubscriptionId,
    pub records: Vec<Value>,
    /// The client params the subscription was created with.
    pub params: Params,
    /// False only for the initial full dataset.
    pub diff: bool,
}

impl SyncMessage {
    /// Event name used on the wire.
    pub const EVENT: &'static str = "SYNC_NOW";
}
