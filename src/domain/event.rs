use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written with every persisted record.
pub const CURRENT_SCHEMA: u16 = 1;

/// One captured occurrence.
///
/// Serializes to the collector's wire shape: `{type, payload, timestamp, sequence}`.
/// Fields are private; an event is never mutated after the pipeline stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
    timestamp: DateTime<Utc>,
    sequence: u64,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value, sequence: u64) -> Self {
        Self::with_timestamp(event_type, payload, Utc::now(), sequence)
    }

    pub fn with_timestamp(
        event_type: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp,
            sequence,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Size of the event's JSON wire encoding in bytes.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map_or_else(
            |_| self.event_type.len() + self.payload.to_string().len(),
            |bytes| bytes.len(),
        )
    }
}

/// Persisted shape of an event: the wire record plus a schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub schema: u16,
    #[serde(flatten)]
    pub event: Event,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self {
            schema: CURRENT_SCHEMA,
            event,
        }
    }
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        record.event
    }
}

/// Records written before the schema field existed.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, alias = "data")]
    payload: Value,
    #[serde(default)]
    timestamp: Option<LegacyTimestamp>,
    #[serde(default)]
    sequence: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyTimestamp {
    EpochMillis(i64),
    Rfc3339(DateTime<Utc>),
}

impl LegacyTimestamp {
    fn resolve(self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            LegacyTimestamp::EpochMillis(millis) => {
                Utc.timestamp_millis_opt(millis).single().unwrap_or(fallback)
            }
            LegacyTimestamp::Rfc3339(ts) => ts,
        }
    }
}

/// Result of decoding a stored queue value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordMigration {
    pub events: Vec<Event>,
    /// Legacy records upgraded to the current schema.
    pub migrated: usize,
    /// Records that could not be decoded and were skipped.
    pub dropped: usize,
}

/// Decode a stored queue value into events, preserving stored order.
///
/// Anything other than an array decodes to an empty sequence. Legacy records
/// are upgraded; unknown schemas and undecodable records are dropped.
pub fn migrate_records(value: Option<Value>, now: DateTime<Utc>) -> RecordMigration {
    let mut migration = RecordMigration::default();

    let items = match value {
        Some(Value::Array(items)) => items,
        Some(_) => {
            migration.dropped = 1;
            return migration;
        }
        None => return migration,
    };

    // Records without a sequence are numbered after the highest explicit one
    let mut decoded: Vec<(Event, bool)> = Vec::with_capacity(items.len());

    for item in items {
        let schema = item.get("schema").map(Value::as_u64);

        let record = match schema {
            Some(Some(version)) if version == CURRENT_SCHEMA as u64 => {
                serde_json::from_value::<EventRecord>(item)
                    .ok()
                    .map(|record| (Event::from(record), false))
            }
            Some(_) => None,
            None => serde_json::from_value::<LegacyRecord>(item).ok().map(|legacy| {
                migration.migrated += 1;
                let timestamp = legacy.timestamp.map_or(now, |ts| ts.resolve(now));
                let unsequenced = legacy.sequence.is_none();
                let event = Event::with_timestamp(
                    legacy.event_type,
                    legacy.payload,
                    timestamp,
                    legacy.sequence.unwrap_or_default(),
                );
                (event, unsequenced)
            }),
        };

        match record {
            Some(record) => decoded.push(record),
            None => migration.dropped += 1,
        }
    }

    let mut next_sequence = decoded
        .iter()
        .filter(|(_, unsequenced)| !unsequenced)
        .map(|(event, _)| event.sequence + 1)
        .max()
        .unwrap_or(0);

    migration.events = decoded
        .into_iter()
        .map(|(mut event, unsequenced)| {
            if unsequenced {
                event.sequence = next_sequence;
                next_sequence += 1;
            }
            event
        })
        .collect();

    migration
}
