//! Endpoints and the transports used to reach them.
//!
//! An endpoint is one configured backend of a cluster. Every endpoint is reached through a [`Transport`], which is
//! created by a [`Connector`] during the connect phase of the [`EndpointPool`]. The [`NetworkConnector`] provides the
//! stock transports: UDP, TCP and (with the `http` feature) the InfluxDB HTTP API.

use std::{fmt, io, time::Duration};

use thiserror::Error;

mod pool;
pub use self::pool::{CloseError, ConnectError, Endpoint, EndpointPool};

mod tcp;
mod udp;

#[cfg(feature = "http")]
mod http;

mod tls;
pub use self::tls::TlsConfig;

/// Substring that identifies a missing remote namespace in an error message.
pub const DATABASE_NOT_FOUND: &str = "database not found";

/// Kind of transport used to reach an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Datagram-oriented transport.
    Udp,

    /// Stream-oriented transport.
    Tcp,

    /// HTTP(S) client.
    Http,
}

impl TransportKind {
    /// Returns the transport ID.
    ///
    /// This is a simple acronym related to the transport, such as `udp` for UDP, and so on.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.transport_id())
    }
}

/// Address of a single endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteAddr {
    /// A `host:port` reached over UDP.
    Udp(String),

    /// A `host:port` reached over TCP.
    Tcp(String),

    /// An `http://` or `https://` base URL.
    Http(String),
}

impl RemoteAddr {
    /// Parses an endpoint address.
    ///
    /// Addresses with a `udp://`, `tcp://`, `http://` or `https://` scheme use the matching transport. Addresses
    /// without a scheme use `default_kind`.
    ///
    /// # Errors
    ///
    /// If the scheme is unknown, or the address is malformed, an error describing the problem is returned.
    pub fn parse(addr: &str, default_kind: TransportKind) -> Result<Self, String> {
        let (kind, rest) = match addr.split_once("://") {
            Some(("udp", rest)) => (TransportKind::Udp, rest),
            Some(("tcp", rest)) => (TransportKind::Tcp, rest),
            Some(("http" | "https", _)) => return parse_http(addr),
            Some((scheme, _)) => {
                return Err(format!("invalid scheme '{scheme}' (expected 'udp', 'tcp', 'http' or 'https')"))
            }
            None => (default_kind, addr),
        };

        match kind {
            TransportKind::Udp => parse_host_port(rest).map(RemoteAddr::Udp),
            TransportKind::Tcp => parse_host_port(rest).map(RemoteAddr::Tcp),
            TransportKind::Http => parse_http(&format!("http://{addr}")),
        }
    }

    /// Returns the kind of transport used to reach this address.
    pub const fn kind(&self) -> TransportKind {
        match self {
            RemoteAddr::Udp(_) => TransportKind::Udp,
            RemoteAddr::Tcp(_) => TransportKind::Tcp,
            RemoteAddr::Http(_) => TransportKind::Http,
        }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAddr::Udp(addr) => write!(f, "udp://{addr}"),
            RemoteAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            RemoteAddr::Http(url) => f.write_str(url),
        }
    }
}

fn parse_host_port(addr: &str) -> Result<String, String> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("address '{addr}' is missing a port"));
    };

    if host.is_empty() {
        return Err(format!("address '{addr}' is missing a host"));
    }

    match port.parse::<u16>() {
        Ok(_) => Ok(addr.to_string()),
        Err(_) => Err(format!("invalid port '{port}' in address '{addr}'")),
    }
}

#[cfg(feature = "http")]
fn parse_http(addr: &str) -> Result<RemoteAddr, String> {
    let url = url::Url::parse(addr).map_err(|e| format!("invalid URL '{addr}': {e}"))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("URL '{addr}' is missing a host"));
    }

    Ok(RemoteAddr::Http(url.as_str().trim_end_matches('/').to_string()))
}

#[cfg(not(feature = "http"))]
fn parse_http(addr: &str) -> Result<RemoteAddr, String> {
    Err(format!("cannot use '{addr}': HTTP support is not enabled (requires the `http` feature)"))
}

/// Settings shared by every endpoint of a cluster.
#[derive(Clone, Debug)]
pub struct EndpointSettings {
    /// Per-call timeout for connecting and writing. Zero disables it.
    pub timeout: Duration,

    /// Maximum size of a single UDP datagram.
    pub udp_payload_size: usize,

    /// Target database, for transports that write into a named database.
    pub database: String,

    /// Retention policy to write into.
    pub retention_policy: Option<String>,

    /// Write consistency level.
    pub write_consistency: Option<String>,

    /// Username for basic authentication.
    pub username: Option<String>,

    /// Password for basic authentication.
    pub password: Option<String>,

    /// User agent sent with HTTP requests.
    pub user_agent: String,

    /// TLS material for HTTPS endpoints.
    pub tls: TlsConfig,
}

impl EndpointSettings {
    /// Returns the timeout as an `Option`, where `None` means no timeout.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            udp_payload_size: 512,
            database: String::new(),
            retention_policy: None,
            write_consistency: None,
            username: None,
            password: None,
            user_agent: concat!("metrics-exporter-cluster/", env!("CARGO_PKG_VERSION")).to_string(),
            tls: TlsConfig::default(),
        }
    }
}

/// Errors that could occur while talking to an endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to connect to the endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,

        /// Underlying I/O error.
        source: io::Error,
    },

    /// An I/O error occurred while writing to the endpoint.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request did not complete before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint reported that the target database does not exist.
    #[error("database not found: \"{database}\"")]
    DatabaseNotFound {
        /// Database that was written to.
        database: String,
    },

    /// The endpoint answered with an unsuccessful status.
    #[error("server responded with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,

        /// Response body, as returned by the server.
        body: String,
    },

    /// Some lines of the payload are larger than a single datagram, so the payload cannot be sent whole.
    #[error("{lines} line(s) exceed the maximum datagram size of {max_datagram_len} bytes")]
    PayloadTooLarge {
        /// Number of lines that do not fit in a datagram.
        lines: u64,

        /// Maximum datagram size.
        max_datagram_len: usize,
    },

    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// TLS material could not be loaded.
    #[error("invalid TLS configuration: {0}")]
    Tls(String),
}

impl TransportError {
    /// Returns `true` if the error indicates that the remote namespace (database) does not exist.
    ///
    /// [`TransportError::DatabaseNotFound`] always matches. Any other error matches when its message contains
    /// [`DATABASE_NOT_FOUND`].
    pub fn is_namespace_missing(&self) -> bool {
        matches!(self, TransportError::DatabaseNotFound { .. }) || self.to_string().contains(DATABASE_NOT_FOUND)
    }
}

/// A connected handle to a single endpoint.
pub trait Transport: Send {
    /// Returns the kind of transport.
    fn kind(&self) -> TransportKind;

    /// Writes a serialized batch to the endpoint.
    ///
    /// # Errors
    ///
    /// If the endpoint did not accept the batch, an error is returned.
    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Creates the named remote namespace (database), if it does not already exist.
    ///
    /// Transports without remote namespaces do nothing.
    ///
    /// # Errors
    ///
    /// If the namespace could not be created, an error is returned.
    fn create_namespace(&mut self, name: &str) -> Result<(), TransportError> {
        let _ = name;
        Ok(())
    }

    /// Closes the handle.
    ///
    /// # Errors
    ///
    /// If the handle could not be closed cleanly, an error is returned.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Creates transports for endpoint addresses.
pub trait Connector: Send + Sync {
    /// Establishes a transport to the given address.
    ///
    /// # Errors
    ///
    /// If the transport could not be established, an error is returned.
    fn connect(&self, addr: &RemoteAddr, settings: &EndpointSettings) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector for the stock network transports.
#[derive(Default)]
pub struct NetworkConnector {
    #[cfg(feature = "http")]
    http: http::HttpContext,
}

impl NetworkConnector {
    /// Creates a new `NetworkConnector`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for NetworkConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConnector").finish_non_exhaustive()
    }
}

impl Connector for NetworkConnector {
    fn connect(&self, addr: &RemoteAddr, settings: &EndpointSettings) -> Result<Box<dyn Transport>, TransportError> {
        match addr {
            RemoteAddr::Udp(target) => Ok(Box::new(udp::UdpTransport::connect(target, settings)?)),
            RemoteAddr::Tcp(target) => Ok(Box::new(tcp::TcpTransport::connect(target, settings)?)),

            #[cfg(feature = "http")]
            RemoteAddr::Http(url) => Ok(Box::new(self.http.connect(url, settings)?)),

            #[cfg(not(feature = "http"))]
            RemoteAddr::Http(url) => {
                Err(TransportError::Http(format!("cannot connect to '{url}': HTTP support is not enabled")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{RemoteAddr, TransportError, TransportKind};

    #[test]
    fn parse_addresses() {
        // Cases are defined as: address, default kind, expected result.
        let cases = [
            ("udp://localhost:8089", TransportKind::Http, Some(RemoteAddr::Udp("localhost:8089".to_string()))),
            ("tcp://10.0.0.1:2003", TransportKind::Http, Some(RemoteAddr::Tcp("10.0.0.1:2003".to_string()))),
            ("localhost:2003", TransportKind::Tcp, Some(RemoteAddr::Tcp("localhost:2003".to_string()))),
            ("localhost:8089", TransportKind::Udp, Some(RemoteAddr::Udp("localhost:8089".to_string()))),
            ("udp://localhost", TransportKind::Tcp, None),
            ("tcp://:2003", TransportKind::Tcp, None),
            ("tcp://localhost:99999", TransportKind::Tcp, None),
            ("unix:///tmp/socket", TransportKind::Tcp, None),
        ];

        for (addr, default_kind, expected) in cases {
            assert_eq!(RemoteAddr::parse(addr, default_kind).ok(), expected, "address: {addr}");
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn parse_http_addresses() {
        let cases = [
            ("http://localhost:8086", TransportKind::Tcp, Some(RemoteAddr::Http("http://localhost:8086".to_string()))),
            (
                "https://influx.example.com/",
                TransportKind::Tcp,
                Some(RemoteAddr::Http("https://influx.example.com".to_string())),
            ),
            ("localhost:8086", TransportKind::Http, Some(RemoteAddr::Http("http://localhost:8086".to_string()))),
            ("http://", TransportKind::Tcp, None),
        ];

        for (addr, default_kind, expected) in cases {
            assert_eq!(RemoteAddr::parse(addr, default_kind).ok(), expected, "address: {addr}");
        }
    }

    #[test]
    fn kind_and_display() {
        let addr = RemoteAddr::parse("localhost:2003", TransportKind::Tcp).unwrap();
        assert_eq!(addr.kind(), TransportKind::Tcp);
        assert_eq!(addr.to_string(), "tcp://localhost:2003");
        assert_eq!(TransportKind::Udp.to_string(), "udp");
    }

    #[test]
    fn namespace_missing_classification() {
        assert!(TransportError::DatabaseNotFound { database: "telegraf".to_string() }.is_namespace_missing());

        let fallback = TransportError::Status {
            status: 404,
            body: r#"{"error":"database not found: \"telegraf\""}"#.to_string(),
        };
        assert!(fallback.is_namespace_missing());

        let io = TransportError::Io(io::Error::new(io::ErrorKind::Other, "write failed: database not found"));
        assert!(io.is_namespace_missing());

        let unrelated = TransportError::Status { status: 500, body: "internal error".to_string() };
        assert!(!unrelated.is_namespace_missing());
    }
}
