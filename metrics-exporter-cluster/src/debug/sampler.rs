use std::sync::Arc;

use tracing::debug;

use crate::metric::Metric;

use super::frequency::SharedFrequencyTable;

/// Samples outgoing metrics that match a debug filter into a frequency table.
///
/// Sampling for a batch runs until the first metric whose textual representation does not contain the filter string;
/// that metric and every later metric in the same batch are left alone.
#[derive(Clone, Debug)]
pub struct DebugSampler {
    filter: Arc<str>,
    table: SharedFrequencyTable,
}

impl DebugSampler {
    /// Creates a new `DebugSampler`.
    ///
    /// Returns `None` if the filter is empty, as an empty filter disables sampling.
    pub fn new(filter: &str, table: SharedFrequencyTable) -> Option<Self> {
        if filter.is_empty() {
            return None;
        }

        Some(Self { filter: Arc::from(filter), table })
    }

    /// Returns the filter string.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns the frequency table that matching metrics are counted into.
    pub fn table(&self) -> &SharedFrequencyTable {
        &self.table
    }

    /// Starts sampling a new batch.
    pub fn begin_batch(&self) -> BatchSampling {
        BatchSampling { sampler: self.clone(), active: true }
    }
}

/// Sampling state for a single batch.
#[derive(Debug)]
pub struct BatchSampling {
    sampler: DebugSampler,
    active: bool,
}

impl BatchSampling {
    /// Returns `true` while no metric of this batch has missed the filter.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Samples the given metric.
    ///
    /// Returns `true` if the metric matched and was counted.
    pub fn observe(&mut self, metric: &Metric) -> bool {
        if !self.active {
            return false;
        }

        let metric_str = metric.to_string();
        if !metric_str.contains(self.sampler.filter()) {
            self.active = false;
            return false;
        }

        debug!(metric = %metric_str, "Debug filter matched outgoing metric.");
        self.sampler.table.observe(metric);
        true
    }

    /// Logs every serialized line of a matched metric that also contains the filter.
    pub fn observe_serialized(&self, buf: &[u8]) {
        if !self.active {
            return;
        }

        let filter = self.sampler.filter();
        for line in String::from_utf8_lossy(buf).lines().filter(|line| line.contains(filter)) {
            debug!(line, "Debug filter matched outgoing metric line.");
        }
    }

    /// Finishes the batch, dumping the frequency table if sampling stayed active and a dump is due.
    ///
    /// Returns `true` if the table was dumped.
    pub fn finish(self) -> bool {
        if !self.active {
            return false;
        }

        match self.sampler.table.dump_if_due() {
            Some(report) => {
                report.log();
                true
            }
            None => false,
        }
    }
}
