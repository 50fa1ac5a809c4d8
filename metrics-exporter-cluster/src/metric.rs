use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use metrics::{Key, Label, SharedString};

use crate::serializer::line_protocol;

/// A single field value of a [`Metric`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A floating-point value.
    Float(f64),

    /// A signed integer value.
    Integer(i64),

    /// An unsigned integer value.
    UInteger(u64),

    /// A boolean value.
    Boolean(bool),

    /// A string value.
    String(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInteger(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

/// A time-series data point handed to the writer.
///
/// A metric is made up of a measurement name, a set of tags, one or more fields, and a timestamp. Tags are kept sorted
/// by name and tag names are unique: setting a tag that already exists replaces its value.
///
/// The [`Display`](fmt::Display) implementation renders the metric in the InfluxDB line protocol, without a trailing
/// newline. This is the textual representation that debug filters are matched against.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    name: SharedString,
    tags: Vec<Label>,
    fields: Vec<(SharedString, FieldValue)>,
    timestamp: SystemTime,
}

impl Metric {
    /// Creates a new `Metric` with the given measurement name and timestamp, and no tags or fields.
    pub fn new<N>(name: N, timestamp: SystemTime) -> Self
    where
        N: Into<SharedString>,
    {
        Self { name: name.into(), tags: Vec::new(), fields: Vec::new(), timestamp }
    }

    /// Creates a new `Metric` from a `metrics` key, using the key name as the measurement and its labels as tags.
    pub fn from_key(key: &Key, timestamp: SystemTime) -> Self {
        key.labels().fold(Self::new(key.name().to_string(), timestamp), |metric, label| {
            metric.with_tag(label.key().to_string(), label.value().to_string())
        })
    }

    /// Sets a tag, replacing any existing tag with the same name.
    #[must_use]
    pub fn with_tag<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<SharedString>,
        V: Into<SharedString>,
    {
        let label = Label::new(name, value);
        match self.tags.binary_search_by(|existing| existing.key().cmp(label.key())) {
            Ok(idx) => self.tags[idx] = label,
            Err(idx) => self.tags.insert(idx, label),
        }
        self
    }

    /// Adds a field, replacing any existing field with the same name.
    #[must_use]
    pub fn with_field<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<SharedString>,
        V: Into<FieldValue>,
    {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Returns the measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an iterator over the tags, ordered by tag name.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|label| (label.key(), label.value()))
    }

    /// Returns the value of the given tag, if present.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .binary_search_by(|label| label.key().cmp(name))
            .ok()
            .map(|idx| self.tags[idx].value())
    }

    /// Returns an iterator over the fields, in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> + '_ {
        self.fields.iter().map(|(name, value)| (&**name, value))
    }

    /// Returns the timestamp.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns the timestamp as nanoseconds since the Unix epoch.
    ///
    /// Timestamps before the epoch are clamped to zero.
    pub fn unix_nanos(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Returns the timestamp as whole seconds since the Unix epoch.
    pub fn unix_seconds(&self) -> u64 {
        self.timestamp.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        line_protocol::render(f, self).map(|_| ())
    }
}
