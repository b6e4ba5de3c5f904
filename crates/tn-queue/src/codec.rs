//! Record codec: one measurement to and from one text line.
//!
//! Line format (no trailing newline; the store adds it):
//!
//! ```text
//! <id>;<timestamp_ms>;<field_1>;<field_2>;...;<field_n>
//! 17;3600250;12.41|12.40|12.38;512.0;8.71;76.0;3.91;18
//! ```
//!
//! `;` separates fields and may never appear inside one. A field holding
//! several accumulated samples joins them with `|`. An empty sample means
//! the sensor gave no reading that round.
//!
//! Pure functions, no I/O.

use crate::error::{DecodeError, EncodeError};
use serde::Serialize;
use tn_common::{RecordId, SensorKind, FIELD_DELIMITER, SAMPLE_DELIMITER};

pub use tn_common::MAX_LINE_LEN;

/// Number of header fields (`id`, `timestamp`) before the schema fields.
const HEADER_FIELDS: usize = 2;

/// How a schema field's samples are validated on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Every non-empty sample must parse as a number.
    Numeric,
    /// Free text (still delimiter-free).
    Text,
}

/// One named slot of the record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn numeric(name: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            kind: FieldKind::Numeric,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            kind: FieldKind::Text,
        }
    }
}

/// The configured field layout shared by writer and reader.
///
/// There is no version field in the persisted lines; changing the schema
/// requires a fresh volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Schema { fields }
    }

    /// Schema with one numeric field per active sensor, in order.
    pub fn from_sensors(sensors: &[SensorKind]) -> Self {
        Schema {
            fields: sensors.iter().map(|s| FieldSpec::numeric(s.name())).collect(),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Minimum number of `;`-separated parts a valid line has.
    pub fn min_parts(&self) -> usize {
        HEADER_FIELDS + self.fields.len()
    }
}

/// The unit of durability.
///
/// Status (pending or sent) is not part of the record; it is given by the
/// log the line currently lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: RecordId,
    /// Milliseconds since boot.
    pub timestamp: u32,
    pub fields: Vec<String>,
}

impl Record {
    pub fn new(id: RecordId, timestamp: u32, fields: Vec<String>) -> Self {
        Record {
            id,
            timestamp,
            fields,
        }
    }

    /// Pair each field with its schema name. Fields past the end of the
    /// schema are reported under a positional name.
    pub fn named_fields<'a>(&'a self, schema: &'a Schema) -> Vec<(String, &'a str)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let name = schema
                    .fields()
                    .get(i)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| format!("field_{}", i));
                (name, value.as_str())
            })
            .collect()
    }
}

/// Join accumulated samples into one field value.
pub fn join_samples<S: AsRef<str>>(samples: &[S]) -> String {
    let mut out = String::new();
    for (i, s) in samples.iter().enumerate() {
        if i > 0 {
            out.push(SAMPLE_DELIMITER);
        }
        out.push_str(s.as_ref());
    }
    out
}

/// Split a field value into its accumulated samples.
pub fn split_samples(field: &str) -> Vec<&str> {
    field.split(SAMPLE_DELIMITER).collect()
}

/// Encode a record as one line.
pub fn encode(record: &Record) -> Result<String, EncodeError> {
    for (index, field) in record.fields.iter().enumerate() {
        if field.contains(FIELD_DELIMITER) {
            return Err(EncodeError::ReservedDelimiter {
                index,
                value: field.clone(),
            });
        }
        if field.contains('\n') || field.contains('\r') {
            return Err(EncodeError::LineBreak { index });
        }
    }

    let mut line = format!("{}{}{}", record.id, FIELD_DELIMITER, record.timestamp);
    for field in &record.fields {
        line.push(FIELD_DELIMITER);
        line.push_str(field);
    }

    if line.len() > MAX_LINE_LEN {
        return Err(EncodeError::TooLong {
            len: line.len(),
            max: MAX_LINE_LEN,
        });
    }
    Ok(line)
}

/// Decode one persisted line against the schema.
///
/// Lines with extra trailing fields decode with those fields preserved.
/// Lines over [`MAX_LINE_LEN`] are rejected.
pub fn decode(line: &str, schema: &Schema) -> Result<Record, DecodeError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.len() > MAX_LINE_LEN {
        return Err(DecodeError::TooLong {
            len: line.len(),
            max: MAX_LINE_LEN,
        });
    }
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();

    if parts.len() < schema.min_parts() {
        return Err(DecodeError::FieldCount {
            expected: schema.min_parts(),
            found: parts.len(),
        });
    }

    let id = parse_header::<u32>("id", parts[0])?;
    let timestamp = parse_header::<u32>("timestamp", parts[1])?;

    let fields: Vec<String> = parts[HEADER_FIELDS..].iter().map(|s| s.to_string()).collect();

    for (spec, value) in schema.fields().iter().zip(&fields) {
        if spec.kind == FieldKind::Numeric {
            for sample in split_samples(value) {
                if !sample.is_empty() && sample.parse::<f64>().is_err() {
                    return Err(DecodeError::Numeric {
                        field: spec.name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
    }

    Ok(Record {
        id: RecordId(id),
        timestamp,
        fields,
    })
}

fn parse_header<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, DecodeError> {
    value.parse::<T>().map_err(|_| DecodeError::Numeric {
        field: name.to_string(),
        value: value.to_string(),
    })
}
