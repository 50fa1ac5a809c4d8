use tracing::error;

use crate::{
    debug::BatchSampling,
    metric::Metric,
    serializer::{Encoding, SerializeError, Serializer},
};

/// A serialized batch of metrics, ready to be written to an endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    buf: Vec<u8>,
    metrics_written: usize,
    metrics_skipped: usize,
}

impl Batch {
    /// Returns the serialized payload.
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// Returns `true` if the batch holds no serialized metrics.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the number of metrics serialized into the payload.
    pub fn metrics_written(&self) -> usize {
        self.metrics_written
    }

    /// Returns the number of metrics left out because they failed to serialize.
    pub fn metrics_skipped(&self) -> usize {
        self.metrics_skipped
    }
}

/// Builds serialized [`Batch`]es out of metric sequences.
pub struct BatchBuilder {
    serializer: Box<dyn Serializer>,
}

impl BatchBuilder {
    /// Creates a new `BatchBuilder` for the given encoding.
    ///
    /// # Errors
    ///
    /// If the encoding is misconfigured, an error is returned.
    pub fn new(encoding: &Encoding) -> Result<Self, SerializeError> {
        encoding.serializer().map(Self::from_serializer)
    }

    /// Creates a new `BatchBuilder` around an existing serializer.
    pub fn from_serializer(serializer: Box<dyn Serializer>) -> Self {
        Self { serializer }
    }

    /// Serializes every metric into a single batch.
    ///
    /// Metrics that fail to serialize are logged and left out of the batch; the rest of the batch is still built. When
    /// `sampling` is given, each metric is offered to it before being serialized.
    pub fn build(&self, metrics: &[Metric], mut sampling: Option<&mut BatchSampling>) -> Batch {
        let mut batch = Batch::default();

        for metric in metrics {
            let sampled = sampling.as_deref_mut().is_some_and(|sampling| sampling.observe(metric));

            match self.serializer.serialize(metric) {
                Ok(buf) => {
                    if sampled {
                        if let Some(sampling) = sampling.as_deref() {
                            sampling.observe_serialized(&buf);
                        }
                    }

                    batch.buf.extend_from_slice(&buf);
                    batch.metrics_written += 1;
                }
                Err(e) => {
                    error!(measurement = metric.name(), error = %e, "Failed to serialize metric, skipping.");
                    batch.metrics_skipped += 1;
                }
            }
        }

        batch
    }
}
