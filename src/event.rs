//! The event record envelope: mandatory fields every stream record carries,
//! and the deterministic `event_id` digest.
//!
//! `event_id` is a 10-byte BLAKE2s digest over the type's enumerated source
//! fields, `\u{1f}`-joined in a fixed order, hex encoded. Two records with
//! identical source fields always get identical ids; nothing
//! time-of-generation or random enters the computation beyond the fields
//! themselves.

use blake2::digest::{Digest, consts::U10};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

type Blake2s80 = blake2::Blake2s<U10>;

/// Current envelope schema version stamped on every record.
pub const SCHEMA_VERSION: u32 = 1;

/// Millisecond-resolution UTC timestamp in the record's `timestamp` field shape.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute the deterministic `event_id`: BLAKE2s with a 10-byte digest over
/// the fields joined by `\u{1f}`, hex-encoded.
pub fn event_id(fields: &[&str]) -> String {
    let joined = fields.join("\u{1f}");
    let mut hasher = Blake2s80::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Assemble a complete record: mandatory envelope fields plus the
/// type-specific `extra` fields, with `event_id` computed over `id_fields`
/// (which must already include `type`, `hostname`, `timestamp`, and whatever
/// else the type's field set names, in order).
pub fn build_record(
    event_type: &str,
    hostname: &str,
    timestamp: &str,
    id_fields: &[&str],
    extra: Map<String, Value>,
) -> Value {
    let mut record = Map::with_capacity(extra.len() + 5);
    record.insert("type".to_owned(), json!(event_type));
    record.insert("schema_version".to_owned(), json!(SCHEMA_VERSION));
    record.insert("timestamp".to_owned(), json!(timestamp));
    record.insert("hostname".to_owned(), json!(hostname));
    record.insert("event_id".to_owned(), json!(event_id(id_fields)));
    for (k, v) in extra {
        record.insert(k, v);
    }
    Value::Object(record)
}
