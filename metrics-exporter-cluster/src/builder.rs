use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{
    debug::{DebugSampler, SharedFrequencyTable},
    dispatcher::{ClusterWriter, RepairPolicy, WriterConfiguration},
    endpoint::{Connector, EndpointSettings, NetworkConnector, RemoteAddr, TlsConfig, TransportKind},
    serializer::{Encoding, DEFAULT_GRAPHITE_TEMPLATE},
};

const DEFAULT_INFLUXDB_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INFLUXDB_DATABASE: &str = "telegraf";
const DEFAULT_UDP_PAYLOAD_SIZE: usize = 512;
const DEFAULT_GRAPHITE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_GRAPHITE_SERVER: &str = "localhost:2003";

/// Errors that could occur while building a cluster writer.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse an endpoint address.
    #[error("invalid remote address '{address}': {reason}")]
    InvalidRemoteAddress {
        /// The address as configured.
        address: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// No endpoint address was configured.
    #[error("no endpoint addresses configured")]
    NoAddresses,

    /// The UDP payload size cannot fit any data.
    #[error("UDP payload size must be greater than zero")]
    InvalidUdpPayloadSize,
}

/// Backend flavor of a cluster.
///
/// The flavor picks the defaults of a [`ClusterBuilder`] and the transport used for addresses without a scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// InfluxDB 1.x, over HTTP(S) or UDP, in line protocol.
    InfluxDb,

    /// Graphite (Carbon), over TCP, in the Graphite plaintext protocol.
    Graphite,
}

impl Flavor {
    /// Returns the name of the flavor.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Flavor::InfluxDb => "influxdb",
            Flavor::Graphite => "graphite",
        }
    }

    /// Returns the transport used for addresses without a scheme.
    pub const fn default_transport(&self) -> TransportKind {
        match self {
            Flavor::InfluxDb => TransportKind::Http,
            Flavor::Graphite => TransportKind::Tcp,
        }
    }
}

/// Builder for a [`ClusterWriter`].
pub struct ClusterBuilder {
    flavor: Flavor,
    urls: Vec<String>,
    legacy_url: Option<String>,
    settings: EndpointSettings,
    encoding: Encoding,
    debug_filter: Option<String>,
    frequency_table: Option<SharedFrequencyTable>,
    repair_policy: RepairPolicy,
    reconnect_on_failure: bool,
    rng_seed: Option<u64>,
    telemetry: bool,
}

impl ClusterBuilder {
    /// Creates a builder for an InfluxDB cluster.
    ///
    /// Batches are encoded in line protocol. Addresses without a scheme are reached over HTTP, and `udp://` addresses
    /// over UDP. The writer creates the target database on every endpoint when connecting, and again whenever a write
    /// reports it missing.
    ///
    /// At least one URL must be configured.
    pub fn influxdb() -> Self {
        let settings = EndpointSettings {
            timeout: DEFAULT_INFLUXDB_TIMEOUT,
            udp_payload_size: DEFAULT_UDP_PAYLOAD_SIZE,
            database: DEFAULT_INFLUXDB_DATABASE.to_string(),
            ..Default::default()
        };

        Self::new(Flavor::InfluxDb, settings, Encoding::LineProtocol)
    }

    /// Creates a builder for a Graphite cluster.
    ///
    /// Batches are encoded in the Graphite plaintext protocol using the `host.tags.measurement.field` template.
    /// Addresses without a scheme are reached over TCP. Every server is dialed again after a write that no server
    /// accepted.
    ///
    /// Defaults to a single server at `localhost:2003`.
    pub fn graphite() -> Self {
        let settings = EndpointSettings { timeout: DEFAULT_GRAPHITE_TIMEOUT, ..Default::default() };
        let encoding = Encoding::Graphite { prefix: None, template: DEFAULT_GRAPHITE_TEMPLATE.to_string() };

        Self::new(Flavor::Graphite, settings, encoding)
    }

    fn new(flavor: Flavor, settings: EndpointSettings, encoding: Encoding) -> Self {
        Self {
            flavor,
            urls: Vec::new(),
            legacy_url: None,
            settings,
            encoding,
            debug_filter: None,
            frequency_table: None,
            repair_policy: RepairPolicy::default(),
            reconnect_on_failure: flavor == Flavor::Graphite,
            rng_seed: None,
            telemetry: true,
        }
    }

    /// Sets the addresses of the cluster's endpoints.
    ///
    /// Every address names one replica of the cluster: each batch is written to exactly one of them. Addresses can be
    /// given as `udp://host:port`, `tcp://host:port`, `http://...` or `https://...`, or as a bare `host:port` which
    /// uses the flavor's default transport.
    #[must_use]
    pub fn with_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a single endpoint address, for configurations that predate [`with_urls`](Self::with_urls).
    ///
    /// The address is added after the ones given to `with_urls`.
    #[must_use]
    pub fn with_legacy_url<S: Into<String>>(mut self, url: S) -> Self {
        self.legacy_url = Some(url.into());
        self
    }

    /// Sets the per-call timeout for connecting and writing.
    ///
    /// A zero duration disables the timeout.
    ///
    /// Defaults to 5 seconds for InfluxDB, and 2 seconds for Graphite.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Sets the database to write into.
    ///
    /// Defaults to `telegraf` for InfluxDB. Graphite has no databases, so the setting is ignored.
    #[must_use]
    pub fn with_database<S: Into<String>>(mut self, database: S) -> Self {
        self.settings.database = database.into();
        self
    }

    /// Sets the retention policy to write into.
    ///
    /// Defaults to the database's default retention policy.
    #[must_use]
    pub fn with_retention_policy<S: Into<String>>(mut self, retention_policy: S) -> Self {
        self.settings.retention_policy = Some(retention_policy.into());
        self
    }

    /// Sets the write consistency level, for clustered InfluxDB deployments.
    ///
    /// Can be `any`, `one`, `quorum` or `all`.
    #[must_use]
    pub fn with_write_consistency<S: Into<String>>(mut self, write_consistency: S) -> Self {
        self.settings.write_consistency = Some(write_consistency.into());
        self
    }

    /// Sets the credentials used for HTTP basic authentication.
    #[must_use]
    pub fn with_credentials<U, P>(mut self, username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.settings.username = Some(username.into());
        self.settings.password = password.map(Into::into);
        self
    }

    /// Sets the user agent sent with HTTP requests.
    #[must_use]
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.settings.user_agent = user_agent.into();
        self
    }

    /// Sets the maximum size of a single UDP datagram.
    ///
    /// Batches written to UDP endpoints are split on line boundaries to fit. A single line that is larger than this
    /// size is dropped.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_udp_payload_size(mut self, udp_payload_size: usize) -> Self {
        self.settings.udp_payload_size = udp_payload_size;
        self
    }

    /// Sets the CA file used to verify HTTPS servers.
    ///
    /// Defaults to the platform's native root certificates.
    #[must_use]
    pub fn with_tls_ca_file<P: Into<PathBuf>>(mut self, ca_file: P) -> Self {
        self.settings.tls.ca_file = Some(ca_file.into());
        self
    }

    /// Sets the client certificate and key presented to HTTPS servers.
    #[must_use]
    pub fn with_tls_client_auth<C, K>(mut self, cert_file: C, key_file: K) -> Self
    where
        C: Into<PathBuf>,
        K: Into<PathBuf>,
    {
        self.settings.tls.cert_file = Some(cert_file.into());
        self.settings.tls.key_file = Some(key_file.into());
        self
    }

    /// Sets whether to skip verification of HTTPS server certificates.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_insecure_skip_verify(mut self, insecure_skip_verify: bool) -> Self {
        self.settings.tls.insecure_skip_verify = insecure_skip_verify;
        self
    }

    /// Sets the full TLS configuration.
    #[must_use]
    pub fn with_tls_config(mut self, tls: TlsConfig) -> Self {
        self.settings.tls = tls;
        self
    }

    /// Sets the prefix prepended to every Graphite bucket.
    ///
    /// Only applies to the Graphite encoding.
    #[must_use]
    pub fn with_graphite_prefix<S: Into<String>>(mut self, new_prefix: S) -> Self {
        if let Encoding::Graphite { prefix, .. } = &mut self.encoding {
            *prefix = Some(new_prefix.into());
        }
        self
    }

    /// Sets the template used to build Graphite buckets.
    ///
    /// Only applies to the Graphite encoding. An invalid template makes every write fail before anything is sent.
    ///
    /// Defaults to `host.tags.measurement.field`.
    #[must_use]
    pub fn with_graphite_template<S: Into<String>>(mut self, new_template: S) -> Self {
        if let Encoding::Graphite { template, .. } = &mut self.encoding {
            *template = new_template.into();
        }
        self
    }

    /// Sets the debug filter.
    ///
    /// When set, outgoing metrics whose line protocol representation contains the filter are logged and counted into
    /// a frequency table, which is dumped at most once a minute. See [`DebugSampler`] for details.
    ///
    /// An empty filter disables debug sampling, which is the default.
    #[must_use]
    pub fn with_debug_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.debug_filter = Some(filter.into());
        self
    }

    /// Sets the frequency table that debug sampling counts into.
    ///
    /// Sharing one table between several writers gives a single, process-wide cardinality report. Defaults to a table
    /// owned by the writer.
    #[must_use]
    pub fn with_frequency_table(mut self, table: SharedFrequencyTable) -> Self {
        self.frequency_table = Some(table);
        self
    }

    /// Sets what happens after a missing database was successfully recreated during a write.
    ///
    /// Defaults to [`RepairPolicy::CountAsFailed`].
    #[must_use]
    pub fn with_repair_policy(mut self, repair_policy: RepairPolicy) -> Self {
        self.repair_policy = repair_policy;
        self
    }

    /// Sets whether every configured address is dialed again after a write that no endpoint accepted.
    ///
    /// Addresses that could not be connected are otherwise left out until the writer is closed, or until no endpoint
    /// is connected at all. A failed reconnect is logged, and the next write connects again if no endpoint is left.
    ///
    /// Defaults to `true` for Graphite, and `false` for InfluxDB.
    #[must_use]
    pub fn with_reconnect_on_failure(mut self, reconnect_on_failure: bool) -> Self {
        self.reconnect_on_failure = reconnect_on_failure;
        self
    }

    /// Seeds the random number generator that shuffles the endpoints before every write.
    ///
    /// Defaults to a seed drawn from the thread-local generator.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Sets whether or not to enable telemetry for the writer.
    ///
    /// When enabled, counters about sent and dropped batches, endpoint errors and database repairs are emitted under
    /// `cluster.writer.*` through the installed recorder.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the endpoint addresses, with the legacy URL appended after the configured URLs.
    fn addresses(&self) -> Result<Vec<RemoteAddr>, BuildError> {
        let mut urls: Vec<&str> = self.urls.iter().map(String::as_str).collect();
        if let Some(url) = self.legacy_url.as_deref().filter(|url| !url.is_empty()) {
            urls.push(url);
        }

        if urls.is_empty() {
            match self.flavor {
                Flavor::InfluxDb => return Err(BuildError::NoAddresses),
                Flavor::Graphite => urls.push(DEFAULT_GRAPHITE_SERVER),
            }
        }

        urls.into_iter()
            .map(|url| {
                RemoteAddr::parse(url, self.flavor.default_transport())
                    .map_err(|reason| BuildError::InvalidRemoteAddress { address: url.to_string(), reason })
            })
            .collect()
    }

    /// Builds the writer, using the stock network transports.
    ///
    /// No connection is made until the first write, or an explicit call to [`ClusterWriter::connect`].
    ///
    /// # Errors
    ///
    /// If any address is invalid, or no address was configured, an error is returned.
    pub fn build(self) -> Result<ClusterWriter, BuildError> {
        self.build_with_connector(NetworkConnector::new())
    }

    /// Builds the writer, using the given connector to reach endpoints.
    ///
    /// # Errors
    ///
    /// If any address is invalid, or no address was configured, an error is returned.
    pub fn build_with_connector<C>(self, connector: C) -> Result<ClusterWriter, BuildError>
    where
        C: Connector + 'static,
    {
        let addrs = self.addresses()?;
        if self.settings.udp_payload_size == 0 {
            return Err(BuildError::InvalidUdpPayloadSize);
        }

        let sampler = self.debug_filter.as_deref().and_then(|filter| {
            DebugSampler::new(filter, self.frequency_table.clone().unwrap_or_default())
        });

        // Only InfluxDB has databases to create and repair.
        let namespace = match self.flavor {
            Flavor::InfluxDb => Some(self.settings.database.clone()).filter(|db| !db.is_empty()),
            Flavor::Graphite => None,
        };

        let config = WriterConfiguration {
            flavor: self.flavor,
            addrs,
            settings: self.settings,
            namespace,
            encoding: self.encoding,
            sampler,
            repair_policy: self.repair_policy,
            reconnect_on_failure: self.reconnect_on_failure,
            rng_seed: self.rng_seed,
            telemetry: self.telemetry,
        };

        Ok(ClusterWriter::new(config, Box::new(connector)))
    }
}
