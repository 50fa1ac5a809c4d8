use std::fmt;

use rand::{seq::SliceRandom as _, Rng, SeedableRng as _};
use rand_xoshiro::Xoshiro256PlusPlus;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::{
    batch::{Batch, BatchBuilder},
    builder::Flavor,
    debug::DebugSampler,
    endpoint::{CloseError, ConnectError, Connector, Endpoint, EndpointPool, EndpointSettings, RemoteAddr},
    metric::Metric,
    serializer::{Encoding, SerializeError},
    telemetry::{Telemetry, TelemetryUpdate},
};

/// Errors that could occur while writing a batch.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The endpoint pool was empty and could not be connected.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The serializer is misconfigured, so nothing could be written.
    #[error("failed to set up serializer: {0}")]
    Encoder(#[from] SerializeError),

    /// Every endpoint was tried once, and none accepted the batch.
    ///
    /// The individual failures were logged as they happened. The batch is dropped.
    #[error("could not write to any server in cluster")]
    AllEndpointsFailed {
        /// Number of endpoints that were tried.
        attempted: usize,
    },
}

/// What to do after a missing database was recreated during a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepairPolicy {
    /// The endpoint still counts as failed for the current batch, which moves on to the next endpoint.
    #[default]
    CountAsFailed,

    /// The batch is written to the repaired endpoint once more before moving on to the next endpoint.
    RetryAfterRepair,
}

pub(crate) struct WriterConfiguration {
    pub flavor: Flavor,
    pub addrs: Vec<RemoteAddr>,
    pub settings: EndpointSettings,
    pub namespace: Option<String>,
    pub encoding: Encoding,
    pub sampler: Option<DebugSampler>,
    pub repair_policy: RepairPolicy,
    pub reconnect_on_failure: bool,
    pub rng_seed: Option<u64>,
    pub telemetry: bool,
}

/// Returns the indices `0..len` in a uniformly random order.
pub(crate) fn permutation<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}

/// Writes batches of metrics to a cluster of interchangeable endpoints.
///
/// Every batch is serialized once, then offered to the endpoints in a fresh random order until one of them accepts it.
/// Each endpoint gets a single attempt per batch: when all of them fail, the batch is dropped and
/// [`WriteError::AllEndpointsFailed`] is returned. Nothing is queued or retried across calls. When reconnecting on
/// failure is enabled, every configured address is dialed again after such a failure, which brings back endpoints
/// that could not be connected earlier.
///
/// Writes are blocking, and endpoints are tried one at a time. A writer must not be used from within an asynchronous
/// runtime; use `spawn_blocking` or a dedicated thread.
pub struct ClusterWriter {
    flavor: Flavor,
    addrs: Vec<RemoteAddr>,
    settings: EndpointSettings,
    namespace: Option<String>,
    encoding: Encoding,
    sampler: Option<DebugSampler>,
    repair_policy: RepairPolicy,
    reconnect_on_failure: bool,
    connector: Box<dyn Connector>,
    pool: EndpointPool,
    rng: Xoshiro256PlusPlus,
    telemetry_enabled: bool,
    telemetry: Option<Telemetry>,
}

impl ClusterWriter {
    pub(crate) fn new(config: WriterConfiguration, connector: Box<dyn Connector>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };

        Self {
            flavor: config.flavor,
            addrs: config.addrs,
            settings: config.settings,
            namespace: config.namespace,
            encoding: config.encoding,
            sampler: config.sampler,
            repair_policy: config.repair_policy,
            reconnect_on_failure: config.reconnect_on_failure,
            connector,
            pool: EndpointPool::new(),
            rng,
            telemetry_enabled: config.telemetry,
            telemetry: None,
        }
    }

    /// Returns the configured endpoint addresses.
    pub fn addresses(&self) -> &[RemoteAddr] {
        &self.addrs
    }

    /// Returns the currently connected endpoints.
    pub fn endpoints(&self) -> &[Endpoint] {
        self.pool.endpoints()
    }

    /// Returns the debug sampler, if a debug filter is configured.
    pub fn debug_sampler(&self) -> Option<&DebugSampler> {
        self.sampler.as_ref()
    }

    /// Connects to every configured address.
    ///
    /// Writing to a writer without connected endpoints connects it first, so calling this is only needed to surface
    /// connection problems early.
    ///
    /// # Errors
    ///
    /// If no endpoint could be connected, an error is returned.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        self.pool.connect(&self.addrs, &self.settings, self.connector.as_ref(), self.namespace.as_deref())
    }

    /// Closes every connected endpoint.
    ///
    /// Every endpoint is closed even when some fail to. The next write connects again.
    ///
    /// # Errors
    ///
    /// If any endpoint failed to close, an error combining every failure is returned.
    pub fn close(&mut self) -> Result<(), CloseError> {
        self.pool.teardown()
    }

    /// Writes a batch of metrics to one endpoint of the cluster.
    ///
    /// Metrics that cannot be serialized are logged and left out of the batch. A batch left empty is not sent.
    ///
    /// # Errors
    ///
    /// If the serializer is misconfigured, if there are no connected endpoints and none can be connected, or if no
    /// endpoint accepted the batch, an error is returned.
    pub fn write(&mut self, metrics: &[Metric]) -> Result<(), WriteError> {
        let builder = BatchBuilder::new(&self.encoding)?;

        if self.pool.is_empty() {
            self.connect()?;
        }

        let mut sampling = self.sampler.as_ref().map(DebugSampler::begin_batch);
        let batch = builder.build(metrics, sampling.as_mut());

        let mut update = TelemetryUpdate::default();
        update.track_metrics_skipped(batch.metrics_skipped());

        let result = if batch.is_empty() {
            debug!(metrics = metrics.len(), "Nothing to write after serialization, skipping batch.");
            Ok(())
        } else {
            self.dispatch(&batch, &mut update)
        };

        if self.reconnect_on_failure && matches!(result, Err(WriteError::AllEndpointsFailed { .. })) {
            self.reconnect();
        }

        // The frequency table is dumped whatever the outcome of the write.
        if let Some(sampling) = sampling {
            sampling.finish();
        }

        self.update_telemetry(&update);
        result
    }

    fn dispatch(&mut self, batch: &Batch, update: &mut TelemetryUpdate) -> Result<(), WriteError> {
        let payload = batch.payload();
        let order = permutation(&mut self.rng, self.pool.len());
        let attempted = order.len();

        for index in order {
            let Some(endpoint) = self.pool.get_mut(index) else {
                continue;
            };

            trace!(addr = %endpoint.addr(), bytes = payload.len(), "Writing batch to endpoint.");
            let err = match endpoint.write(payload) {
                Ok(()) => {
                    debug!(addr = %endpoint.addr(), metrics = batch.metrics_written(), "Wrote batch.");
                    update.track_batch_sent(payload.len());
                    return Ok(());
                }
                Err(e) => e,
            };

            update.track_endpoint_write_failed();
            error!(addr = %endpoint.addr(), error = %err, "Failed to write batch to endpoint.");

            if !err.is_namespace_missing() {
                continue;
            }
            let Some(namespace) = self.namespace.as_deref() else {
                continue;
            };

            update.track_namespace_repair();
            if let Err(e) = endpoint.create_namespace(namespace) {
                error!(
                    addr = %endpoint.addr(), database = namespace, error = %e,
                    "Database not found and failed to recreate."
                );
                continue;
            }

            if self.repair_policy == RepairPolicy::RetryAfterRepair {
                match endpoint.write(payload) {
                    Ok(()) => {
                        debug!(
                            addr = %endpoint.addr(), metrics = batch.metrics_written(),
                            "Wrote batch after recreating database."
                        );
                        update.track_batch_sent(payload.len());
                        return Ok(());
                    }
                    Err(e) => {
                        update.track_endpoint_write_failed();
                        error!(
                            addr = %endpoint.addr(), error = %e,
                            "Failed to write batch to endpoint after recreating database."
                        );
                    }
                }
            }
        }

        update.track_batch_dropped();
        Err(WriteError::AllEndpointsFailed { attempted })
    }

    fn reconnect(&mut self) {
        debug!(addrs = self.addrs.len(), "Reconnecting to every endpoint after a failed write.");
        if let Err(e) = self.connect() {
            error!(error = %e, "Failed to reconnect after a failed write.");
        }
    }

    fn update_telemetry(&mut self, update: &TelemetryUpdate) {
        // Telemetry is created lazily, so that it registers with whichever recorder is installed at the time metrics
        // are first written rather than when the writer was built.
        if self.telemetry_enabled && update.had_updates() {
            let flavor = self.flavor.as_str();
            let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(flavor));
            telemetry.apply_update(update);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_pool(&mut self, pool: EndpointPool) {
        self.pool = pool;
    }
}

impl fmt::Debug for ClusterWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterWriter")
            .field("flavor", &self.flavor)
            .field("addrs", &self.addrs)
            .field("endpoints", &self.pool.len())
            .field("repair_policy", &self.repair_policy)
            .finish_non_exhaustive()
    }
}
