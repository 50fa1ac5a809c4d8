//! Debug sampling of outgoing metrics.
//!
//! When a debug filter is configured, outgoing metrics whose textual representation contains the filter are logged
//! and their tags are counted in a [`FrequencyTable`]. The table is periodically dumped as a cardinality report, which
//! makes it possible to spot a measurement whose tag cardinality is exploding before it degrades the backend.

mod frequency;
pub use self::frequency::{
    FrequencyReport, FrequencyTable, MeasurementSummary, SharedFrequencyTable, DUMP_INTERVAL,
};

mod sampler;
pub use self::sampler::{BatchSampling, DebugSampler};
