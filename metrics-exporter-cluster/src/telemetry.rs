use metrics::{counter, Counter};

/// Writer telemetry.
///
/// `Telemetry` collects information about the writer's behavior and reports it as normal metrics through whichever
/// recorder is installed.
pub struct Telemetry {
    batches_sent: Counter,
    batches_dropped: Counter,
    metrics_skipped: Counter,
    endpoint_write_errors: Counter,
    namespace_repairs: Counter,
    bytes_sent: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(flavor: &'static str) -> Self {
        let labels = telemetry_tags!("writer" => flavor);

        Self {
            batches_sent: counter!("cluster.writer.batches_sent", labels.iter()),
            batches_dropped: counter!("cluster.writer.batches_dropped", labels.iter()),
            metrics_skipped: counter!("cluster.writer.metrics_skipped", labels.iter()),
            endpoint_write_errors: counter!("cluster.writer.endpoint_write_errors", labels.iter()),
            namespace_repairs: counter!("cluster.writer.namespace_repairs", labels.iter()),
            bytes_sent: counter!("cluster.writer.bytes_sent", labels.iter()),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.batches_sent.increment(update.batches_sent);
        self.batches_dropped.increment(update.batches_dropped);
        self.metrics_skipped.increment(update.metrics_skipped);
        self.endpoint_write_errors.increment(update.endpoint_write_errors);
        self.namespace_repairs.increment(update.namespace_repairs);
        self.bytes_sent.increment(update.bytes_sent);
    }
}

/// A buffer for collecting the telemetry of a single write cycle.
#[derive(Debug, Default)]
pub struct TelemetryUpdate {
    batches_sent: u64,
    batches_dropped: u64,
    metrics_skipped: u64,
    endpoint_write_errors: u64,
    namespace_repairs: u64,
    bytes_sent: u64,
}

impl TelemetryUpdate {
    /// Returns `true` if any updates have been recorded.
    pub fn had_updates(&self) -> bool {
        self.batches_sent > 0
            || self.batches_dropped > 0
            || self.metrics_skipped > 0
            || self.endpoint_write_errors > 0
            || self.namespace_repairs > 0
    }

    /// Tracks metrics that were left out of the batch because they failed to serialize.
    pub fn track_metrics_skipped(&mut self, count: usize) {
        self.metrics_skipped += count as u64;
    }

    /// Tracks a failed write to a single endpoint.
    pub fn track_endpoint_write_failed(&mut self) {
        self.endpoint_write_errors += 1;
    }

    /// Tracks an attempt to recreate a missing namespace.
    pub fn track_namespace_repair(&mut self) {
        self.namespace_repairs += 1;
    }

    /// Tracks a batch that was accepted by an endpoint.
    pub fn track_batch_sent(&mut self, bytes_len: usize) {
        self.batches_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a batch that no endpoint accepted.
    pub fn track_batch_dropped(&mut self) {
        self.batches_dropped += 1;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("exporter_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;
