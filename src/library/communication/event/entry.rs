use super::QueueDescriptor;
use crate::library::BoxedError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Field added to every stored record which holds the time it was (re-)enqueued
pub const ENQUEUE_TIME_FIELD: &str = "$enqueuedAt";

/// Field used to wrap payloads which do not serialize into a JSON object
const WRAPPED_VALUE_FIELD: &str = "$value";

/// Errors that may occur while encoding or decoding wire records
#[derive(Debug, Error)]
pub enum RecordError {
    /// The stored record is not valid JSON
    #[error("record is not valid json")]
    Malformed(#[from] serde_json::Error),
    /// The stored record is valid JSON but not an object
    #[error("record is not a json object")]
    NotAnObject,
    /// The payload uses a field name which is reserved for the record envelope
    #[error("payload uses reserved field {0}")]
    ReservedField(&'static str),
}

/// Serializes a message into its canonical form
///
/// The canonical form is the compact JSON representation with object keys in sorted order.
/// It is used both as the stored payload and as the input for content hashes, so that the
/// same content always yields the same hash regardless of how it was produced.
pub fn canonicalize<T: Serialize + ?Sized>(message: &T) -> Result<String, RecordError> {
    let value = serde_json::to_value(message)?;
    Ok(serde_json::to_string(&value)?)
}

/// Content hash of a canonical payload, used to suppress duplicate enqueues
pub fn content_hash(canonical: &str) -> String {
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Adds the enqueue timestamp to a canonical payload, producing the stored record
///
/// Payloads containing a `$enqueuedAt` field, or consisting of nothing but a `$value` field,
/// are rejected since they could not be told apart from the envelope when reading them back.
pub fn annotate(canonical: &str, enqueued_at: DateTime<Utc>) -> Result<String, RecordError> {
    let mut object = match serde_json::from_str::<Value>(canonical)? {
        Value::Object(object) if object.contains_key(ENQUEUE_TIME_FIELD) => {
            return Err(RecordError::ReservedField(ENQUEUE_TIME_FIELD));
        }
        Value::Object(object) if object.len() == 1 && object.contains_key(WRAPPED_VALUE_FIELD) => {
            return Err(RecordError::ReservedField(WRAPPED_VALUE_FIELD));
        }
        Value::Object(object) => object,
        other => {
            let mut object = Map::new();
            object.insert(WRAPPED_VALUE_FIELD.into(), other);
            object
        }
    };

    object.insert(
        ENQUEUE_TIME_FIELD.into(),
        Value::String(enqueued_at.to_rfc3339()),
    );

    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Removes the enqueue timestamp from a stored record
///
/// Returns the canonical payload and the timestamp, if one was present and parseable.
pub fn strip(record: &str) -> Result<(String, Option<DateTime<Utc>>), RecordError> {
    let mut object = match serde_json::from_str::<Value>(record)? {
        Value::Object(object) => object,
        _ => return Err(RecordError::NotAnObject),
    };

    let enqueued_at = object
        .remove(ENQUEUE_TIME_FIELD)
        .and_then(|value| value.as_str().map(str::to_owned))
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|time| time.with_timezone(&Utc));

    let payload = if object.len() == 1 && object.contains_key(WRAPPED_VALUE_FIELD) {
        object.remove(WRAPPED_VALUE_FIELD).unwrap_or(Value::Null)
    } else {
        Value::Object(object)
    };

    Ok((serde_json::to_string(&payload)?, enqueued_at))
}

/// Re-stamps a stored record with a new enqueue time
pub fn refresh(record: &str, enqueued_at: DateTime<Utc>) -> Result<String, RecordError> {
    let (canonical, _) = strip(record)?;
    annotate(&canonical, enqueued_at)
}

/// Raw record claimed from a queue
///
/// The record is kept verbatim since providers identify the entry in their processing list by
/// its exact contents when it is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    queue: QueueDescriptor,
    record: String,
}

impl QueueEntry {
    /// Creates a new instance from raw parts
    pub fn new(queue: QueueDescriptor, record: String) -> Self {
        Self { queue, record }
    }

    /// Queue from which the entry has been claimed
    pub fn queue(&self) -> &QueueDescriptor {
        &self.queue
    }

    /// Stored record, including the enqueue timestamp
    pub fn record(&self) -> &str {
        &self.record
    }

    /// Canonical payload without the enqueue timestamp
    pub fn canonical_payload(&self) -> Result<String, RecordError> {
        strip(&self.record).map(|(canonical, _)| canonical)
    }

    /// Content hash of the payload, equal to the one computed on enqueue
    pub fn content_hash(&self) -> Result<String, RecordError> {
        self.canonical_payload().map(|canonical| content_hash(&canonical))
    }

    /// Point in time at which the record has last been enqueued
    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        strip(&self.record).ok().and_then(|(_, time)| time)
    }

    /// Attempts to parse the payload into a given data structure
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, BoxedError> {
        let canonical = self.canonical_payload()?;
        serde_json::from_str(&canonical).map_err(Into::into)
    }
}
