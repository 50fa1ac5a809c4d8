//! A writer that sends batches of metrics to one of several interchangeable [InfluxDB][influxdb] or
//! [Graphite][graphite] servers.
//!
//! [influxdb]: https://docs.influxdata.com/influxdb/v1/
//! [graphite]: https://graphite.readthedocs.io/
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::SystemTime;
//! # use metrics_exporter_cluster::{ClusterBuilder, Metric};
//! // First, create a builder for the backend flavor in use.
//! //
//! // The builder configures the endpoint addresses, the database to write to, credentials, TLS, and so on.
//! let builder = ClusterBuilder::influxdb()
//!     .with_urls(["http://influx-a:8086", "http://influx-b:8086", "udp://influx-c:8089"])
//!     .with_database("telegraf");
//!
//! // Building the writer validates the configuration, but does not connect yet.
//! let mut writer = builder.build().expect("failed to build writer");
//!
//! // Each write serializes the batch once, and hands it to the first endpoint that accepts it.
//! let metric = Metric::new("cpu", SystemTime::now()).with_tag("host", "a").with_field("usage", 0.5);
//! writer.write(&[metric]).expect("no endpoint accepted the batch");
//!
//! writer.close().expect("failed to close endpoints");
//! ```
//!
//! # Features
//!
//! ## Fan-out with failover
//!
//! All configured endpoints are treated as equivalent. Every batch is offered to the endpoints in a fresh, uniformly
//! random order, and written to exactly one of them: the first that accepts it. Endpoints that fail are skipped for the
//! current batch only. When every endpoint fails, the batch is dropped and an error is returned.
//!
//! ## Database repair
//!
//! InfluxDB endpoints that report that the target database does not exist get it recreated on the spot, once per
//! failed write. See [`RepairPolicy`] for whether the batch is retried against the repaired endpoint.
//!
//! ## Transports
//!
//! Endpoints can be reached over UDP, TCP, or HTTP(S). HTTP support, including TLS, is behind the `http` feature, which
//! is enabled by default.
//!
//! ## Debug sampling
//!
//! A debug filter can be configured to count the tags of outgoing metrics that match it into a [`FrequencyTable`].
//! A cardinality summary of the table is logged at most once a minute, to help track down series explosions.
//!
//! ## Telemetry
//!
//! The writer captures its own telemetry around batches sent or dropped, endpoint failures, database repairs, and
//! bytes sent, and reports it through the installed [`metrics`] recorder, under the `cluster.writer` namespace.
//!
//! # Missing
//!
//! ## Asynchronous writes
//!
//! Writes are blocking, and endpoints are tried one after the other. The writer must not be used from within an
//! asynchronous runtime.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod batch;
pub use self::batch::{Batch, BatchBuilder};

mod builder;
pub use self::builder::{BuildError, ClusterBuilder, Flavor};

mod datagram;

pub mod debug;
pub use self::debug::{DebugSampler, FrequencyTable, SharedFrequencyTable};

mod dispatcher;
pub use self::dispatcher::{ClusterWriter, RepairPolicy, WriteError};

pub mod endpoint;

mod metric;
pub use self::metric::{FieldValue, Metric};

pub mod serializer;
pub use self::serializer::{Encoding, SerializeError};

mod telemetry;

#[cfg(test)]
mod test_util;
