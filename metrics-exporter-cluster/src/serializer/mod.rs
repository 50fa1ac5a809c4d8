//! Metric serializers.
//!
//! A serializer turns a single [`Metric`] into the bytes sent over the wire. Serializers are constructed from an
//! [`Encoding`] once per write cycle: constructing one is the only place where a configuration error (such as an
//! invalid Graphite template) can surface, and such an error aborts the whole write before any network I/O.

use thiserror::Error;

use crate::metric::Metric;

mod graphite;
pub use self::graphite::{GraphiteSerializer, DEFAULT_GRAPHITE_TEMPLATE};

pub(crate) mod line_protocol;
pub use self::line_protocol::LineProtocolSerializer;

/// Errors that could occur while serializing metrics.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SerializeError {
    /// The metric had no fields that could be represented in the target encoding.
    #[error("metric '{measurement}' has no serializable fields")]
    NoSerializableFields {
        /// Measurement name of the offending metric.
        measurement: String,
    },

    /// The Graphite template was invalid.
    #[error("invalid graphite template '{template}': {reason}")]
    InvalidTemplate {
        /// The template as configured.
        template: String,

        /// Details about why the template was rejected.
        reason: &'static str,
    },
}

/// Serializes a single metric into its wire representation.
///
/// The returned bytes hold one or more complete, newline-terminated lines.
pub trait Serializer: Send + Sync {
    /// Serializes the given metric.
    ///
    /// # Errors
    ///
    /// If the metric cannot be represented in this encoding, an error is returned and the metric should be skipped.
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError>;
}

/// Wire encoding of metric batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// InfluxDB line protocol.
    LineProtocol,

    /// Graphite plaintext protocol.
    Graphite {
        /// Optional prefix prepended to every bucket name.
        prefix: Option<String>,

        /// Template describing how metric names, fields and tags map onto a bucket name.
        template: String,
    },
}

impl Encoding {
    /// Creates the serializer for this encoding.
    ///
    /// # Errors
    ///
    /// If the encoding is misconfigured, an error is returned.
    pub fn serializer(&self) -> Result<Box<dyn Serializer>, SerializeError> {
        match self {
            Encoding::LineProtocol => Ok(Box::new(LineProtocolSerializer)),
            Encoding::Graphite { prefix, template } => {
                GraphiteSerializer::new(prefix.as_deref(), template)
                    .map(|s| Box::new(s) as Box<dyn Serializer>)
            }
        }
    }
}
