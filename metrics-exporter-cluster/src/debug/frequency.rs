use std::{fmt, sync::Arc, time::Duration};

use indexmap::IndexMap;
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use tracing::debug;

use crate::metric::Metric;

/// Minimum time between two frequency table dumps.
pub const DUMP_INTERVAL: Duration = Duration::from_secs(60);

type TagValues = IndexMap<String, u64>;
type Tags = IndexMap<String, TagValues>;

/// Occurrence counts keyed by measurement name, tag name, and tag value.
///
/// The table only ever grows: counts are never decremented and entries are never removed, short of an explicit
/// [`reset`](FrequencyTable::reset). Measurements, tags and values are kept in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct FrequencyTable {
    measurements: IndexMap<String, Tags>,
}

impl FrequencyTable {
    /// Creates an empty `FrequencyTable`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one occurrence of every tag on the given metric.
    ///
    /// The measurement is tracked even if the metric has no tags.
    pub fn observe(&mut self, metric: &Metric) {
        let tags = self.measurements.entry(metric.name().to_string()).or_default();
        for (name, value) in metric.tags() {
            increment(tags, name, value);
        }
    }

    /// Counts one occurrence of the given measurement, tag name, and tag value.
    pub fn record(&mut self, measurement: &str, tag: &str, value: &str) {
        let tags = self.measurements.entry(measurement.to_string()).or_default();
        increment(tags, tag, value);
    }

    /// Returns the number of occurrences seen for the given measurement, tag name, and tag value.
    pub fn count(&self, measurement: &str, tag: &str, value: &str) -> u64 {
        self.measurements
            .get(measurement)
            .and_then(|tags| tags.get(tag))
            .and_then(|values| values.get(value))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of tracked measurements.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Returns `true` if no measurement has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Clears all counts.
    pub fn reset(&mut self) {
        self.measurements.clear();
    }

    /// Summarizes the table, one row per measurement.
    pub fn report(&self) -> FrequencyReport {
        let rows = self
            .measurements
            .iter()
            .map(|(measurement, tags)| {
                let mut summary = MeasurementSummary {
                    measurement: measurement.clone(),
                    tag_count: tags.len(),
                    series_cardinality: 0,
                    total_datapoints: 0,
                    worst_tag: String::new(),
                    worst_tag_cardinality: 0,
                };

                for (tag, values) in tags {
                    if values.len() > summary.worst_tag_cardinality {
                        summary.worst_tag_cardinality = values.len();
                        summary.worst_tag.clone_from(tag);
                    }

                    summary.series_cardinality += values.len();
                    summary.total_datapoints += values.values().sum::<u64>();
                }

                summary
            })
            .collect();

        FrequencyReport { rows }
    }
}

fn increment(tags: &mut Tags, tag: &str, value: &str) {
    *tags.entry(tag.to_owned()).or_default().entry(value.to_owned()).or_insert(0) += 1;
}

/// Cardinality summary of a single measurement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeasurementSummary {
    /// Measurement name.
    pub measurement: String,

    /// Number of distinct tag names.
    pub tag_count: usize,

    /// Number of distinct tag values, summed across all tag names.
    pub series_cardinality: usize,

    /// Sum of all occurrence counts.
    pub total_datapoints: u64,

    /// Tag name with the most distinct values.
    pub worst_tag: String,

    /// Number of distinct values of the worst tag.
    pub worst_tag_cardinality: usize,
}

impl fmt::Display for MeasurementSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>75} | {:>10} | {:>15} | {:>15} | {:>15} | {:>15}",
            self.measurement,
            self.tag_count,
            self.series_cardinality,
            self.total_datapoints,
            self.worst_tag,
            self.worst_tag_cardinality
        )
    }
}

/// Cardinality report over a whole [`FrequencyTable`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrequencyReport {
    rows: Vec<MeasurementSummary>,
}

impl FrequencyReport {
    /// Returns the header line of the report.
    pub fn header() -> String {
        format!(
            "{:>75} | {:>10} | {:>15} | {:>15} | {:>15} | {:>15}",
            "Measurement",
            "tag count",
            "series cardinality",
            "total datapoints",
            "worst tag",
            "worst tag cardinality"
        )
    }

    /// Returns the per-measurement rows.
    pub fn rows(&self) -> &[MeasurementSummary] {
        &self.rows
    }

    /// Emits the report, header first, as debug-level log lines.
    pub fn log(&self) {
        debug!("{}", Self::header());
        for row in &self.rows {
            debug!("{}", row);
        }
    }
}

impl fmt::Display for FrequencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Self::header())?;
        for row in &self.rows {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}

struct TableState {
    table: FrequencyTable,
    last_dump: Instant,
}

/// A [`FrequencyTable`] shared between writers, along with the time it was last dumped.
///
/// Both live behind a single lock, so concurrent batches neither lose updates nor race on the dump schedule. Cloning
/// the handle shares the underlying table.
#[derive(Clone)]
pub struct SharedFrequencyTable {
    state: Arc<Mutex<TableState>>,
    clock: Clock,
}

impl SharedFrequencyTable {
    /// Creates an empty `SharedFrequencyTable`.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Creates an empty `SharedFrequencyTable` that reads the time from the given clock.
    ///
    /// The dump schedule starts at creation: the first dump is due [`DUMP_INTERVAL`] later.
    pub fn with_clock(clock: Clock) -> Self {
        let state = TableState { table: FrequencyTable::new(), last_dump: clock.now() };
        Self { state: Arc::new(Mutex::new(state)), clock }
    }

    /// Counts one occurrence of every tag on the given metric.
    pub fn observe(&self, metric: &Metric) {
        self.state.lock().table.observe(metric);
    }

    /// Returns the number of occurrences seen for the given measurement, tag name, and tag value.
    pub fn count(&self, measurement: &str, tag: &str, value: &str) -> u64 {
        self.state.lock().table.count(measurement, tag, value)
    }

    /// Returns a report of the current table.
    pub fn report(&self) -> FrequencyReport {
        self.state.lock().table.report()
    }

    /// Clears all counts and restarts the dump schedule.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.table.reset();
        state.last_dump = self.clock.now();
    }

    /// Returns a report if at least [`DUMP_INTERVAL`] has elapsed since the last one, marking it as dumped.
    pub fn dump_if_due(&self) -> Option<FrequencyReport> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        if now.saturating_duration_since(state.last_dump) < DUMP_INTERVAL {
            return None;
        }

        state.last_dump = now;
        Some(state.table.report())
    }
}

impl Default for SharedFrequencyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedFrequencyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFrequencyTable").field("table", &self.state.lock().table).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use proptest::prelude::*;
    use quanta::Clock;

    use super::{
        increment, FrequencyReport, FrequencyTable, MeasurementSummary, SharedFrequencyTable, Tags, DUMP_INTERVAL,
    };
    use crate::metric::Metric;

    fn http_response(method: &'static str, path: &'static str) -> Metric {
        Metric::new("http.response", UNIX_EPOCH)
            .with_tag("method", method)
            .with_tag("path", path)
            .with_field("value", 1i64)
    }

    #[test]
    fn counts_start_at_one() {
        let mut table = FrequencyTable::new();
        assert_eq!(table.count("http.response", "method", "GET"), 0);

        table.observe(&http_response("GET", "/foo"));
        assert_eq!(table.count("http.response", "method", "GET"), 1);
        assert_eq!(table.count("http.response", "path", "/foo"), 1);

        table.observe(&http_response("GET", "/bar"));
        assert_eq!(table.count("http.response", "method", "GET"), 2);
        assert_eq!(table.count("http.response", "path", "/bar"), 1);
    }

    #[test]
    fn increment_keeps_first_seen_order() {
        let mut tags = Tags::new();
        increment(&mut tags, "path", "/foo");
        increment(&mut tags, "method", "GET");
        increment(&mut tags, "path", "/bar");
        increment(&mut tags, "path", "/foo");

        let names: Vec<_> = tags.keys().map(String::as_str).collect();
        assert_eq!(names, ["path", "method"]);

        let paths: Vec<_> = tags["path"].iter().map(|(value, count)| (value.as_str(), *count)).collect();
        assert_eq!(paths, [("/foo", 2), ("/bar", 1)]);
        assert_eq!(tags["method"]["GET"], 1);
    }

    #[test]
    fn untagged_measurements_are_tracked() {
        let mut table = FrequencyTable::new();
        table.observe(&Metric::new("uptime", UNIX_EPOCH).with_field("value", 1i64));

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.report().rows(),
            &[MeasurementSummary {
                measurement: "uptime".to_string(),
                tag_count: 0,
                series_cardinality: 0,
                total_datapoints: 0,
                worst_tag: String::new(),
                worst_tag_cardinality: 0,
            }]
        );
    }

    #[test]
    fn report() {
        let mut table = FrequencyTable::new();
        for _ in 0..4 {
            table.record("http.response", "method", "GET");
        }
        for _ in 0..7 {
            table.record("http.response", "method", "POST");
        }
        for _ in 0..73 {
            table.record("http.response", "path", "foo");
        }
        for _ in 0..12 {
            table.record("http.response", "path", "bar");
        }
        table.record("http.response", "path", "baz");
        table.record("cpu", "host", "a");

        let report = table.report();
        assert_eq!(
            report.rows(),
            &[
                MeasurementSummary {
                    measurement: "http.response".to_string(),
                    tag_count: 2,
                    series_cardinality: 5,
                    total_datapoints: 97,
                    worst_tag: "path".to_string(),
                    worst_tag_cardinality: 3,
                },
                MeasurementSummary {
                    measurement: "cpu".to_string(),
                    tag_count: 1,
                    series_cardinality: 1,
                    total_datapoints: 1,
                    worst_tag: "host".to_string(),
                    worst_tag_cardinality: 1,
                },
            ]
        );
    }

    #[test]
    fn report_layout() {
        let header = FrequencyReport::header();
        let columns = header.split(" | ").collect::<Vec<_>>();
        assert_eq!(columns.len(), 6);
        assert_eq!(columns[0].len(), 75);
        assert_eq!(columns[0].trim_start(), "Measurement");
        assert_eq!(columns[1].len(), 10);
        // Column titles longer than their width are not truncated.
        assert_eq!(columns[5], "worst tag cardinality");

        let mut table = FrequencyTable::new();
        table.record("cpu", "host", "a");
        let rendered = table.report().to_string();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            format!("{:>75} | {:>10} | {:>15} | {:>15} | {:>15} | {:>15}", "cpu", 1, 1, 1, "host", 1)
        );
    }

    #[test]
    fn dump_gating() {
        let (clock, mock) = Clock::mock();
        let table = SharedFrequencyTable::with_clock(clock);

        // The schedule starts when the table is created.
        assert!(table.dump_if_due().is_none());

        mock.increment(DUMP_INTERVAL - Duration::from_secs(1));
        assert!(table.dump_if_due().is_none());

        mock.increment(Duration::from_secs(1));
        assert!(table.dump_if_due().is_some());

        // Two triggers less than the interval apart only produce one report.
        mock.increment(Duration::from_secs(30));
        assert!(table.dump_if_due().is_none());

        // Two triggers at least the interval apart produce two.
        mock.increment(Duration::from_secs(30));
        assert!(table.dump_if_due().is_some());
    }

    #[test]
    fn reset_clears_counts_and_schedule() {
        let (clock, mock) = Clock::mock();
        let table = SharedFrequencyTable::with_clock(clock);
        table.observe(&http_response("GET", "/foo"));

        mock.increment(DUMP_INTERVAL);
        table.reset();
        assert_eq!(table.count("http.response", "method", "GET"), 0);
        assert!(table.dump_if_due().is_none());
    }

    #[test]
    fn clones_share_state() {
        let table = SharedFrequencyTable::new();
        let other = table.clone();
        other.observe(&http_response("GET", "/foo"));
        assert_eq!(table.count("http.response", "method", "GET"), 1);
    }

    proptest! {
        #[test]
        fn count_equals_observations(values in proptest::collection::vec("[a-c]", 0..64)) {
            let mut table = FrequencyTable::new();
            let mut previous = 0;
            for (i, value) in values.iter().enumerate() {
                table.record("m", "tag", value);

                let count = table.count("m", "tag", value);
                let expected = values[..=i].iter().filter(|v| *v == value).count() as u64;
                prop_assert_eq!(count, expected);

                let a_count = table.count("m", "tag", "a");
                prop_assert!(a_count >= previous);
                previous = a_count;
            }
        }
    }
}
