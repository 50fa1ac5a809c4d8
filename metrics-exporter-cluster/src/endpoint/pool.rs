use thiserror::Error;
use tracing::{debug, error};

use super::{Connector, EndpointSettings, RemoteAddr, Transport, TransportError, TransportKind};

/// Errors that could occur while connecting the endpoint pool.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Not a single configured address could be connected.
    #[error("no usable endpoints: failed to connect to any of the {attempted} configured addresses")]
    NoUsableEndpoints {
        /// Number of addresses that were tried.
        attempted: usize,
    },

    /// The TLS material could not be loaded, so no HTTPS endpoint could ever be connected.
    #[error("failed to set up TLS for {addr}: {source}")]
    Tls {
        /// Address that was being connected when the TLS material failed to load.
        addr: String,

        /// Underlying error.
        source: TransportError,
    },
}

/// Errors that occurred while closing the endpoints of a pool.
///
/// Every endpoint is closed even when an earlier one fails; the failures are combined into this single error.
#[derive(Debug, Error)]
#[error("output close failed: {}", .errors.join("; "))]
pub struct CloseError {
    errors: Vec<String>,
}

impl CloseError {
    /// Returns the individual failures, one per endpoint that failed to close.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// A connected endpoint.
pub struct Endpoint {
    addr: RemoteAddr,
    transport: Box<dyn Transport>,
}

impl Endpoint {
    /// Creates a new `Endpoint` from an address and its connected transport.
    pub fn new(addr: RemoteAddr, transport: Box<dyn Transport>) -> Self {
        Self { addr, transport }
    }

    /// Returns the address of the endpoint.
    pub fn addr(&self) -> &RemoteAddr {
        &self.addr
    }

    /// Returns the kind of transport used by the endpoint.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Writes a serialized batch to the endpoint.
    ///
    /// # Errors
    ///
    /// If the endpoint did not accept the batch, an error is returned.
    pub fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.transport.write(payload)
    }

    /// Creates the named remote namespace on the endpoint.
    ///
    /// # Errors
    ///
    /// If the namespace could not be created, an error is returned.
    pub fn create_namespace(&mut self, name: &str) -> Result<(), TransportError> {
        self.transport.create_namespace(name)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("addr", &self.addr).field("kind", &self.kind()).finish()
    }
}

/// The set of connected endpoints of a cluster.
#[derive(Debug, Default)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    /// Creates a new, empty `EndpointPool`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `EndpointPool` from already connected endpoints.
    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    /// Connects every address, replacing the current endpoints.
    ///
    /// Addresses are connected independently: an address that fails to connect is logged and left out of the pool.
    /// When `namespace` is given, it is created on every connected endpoint. An endpoint that fails to create it is
    /// still kept, as the namespace can be repaired on a later write.
    ///
    /// # Errors
    ///
    /// If no address could be connected, or the TLS material could not be loaded, an error is returned and the pool is
    /// left empty.
    pub fn connect(
        &mut self,
        addrs: &[RemoteAddr],
        settings: &EndpointSettings,
        connector: &dyn Connector,
        namespace: Option<&str>,
    ) -> Result<(), ConnectError> {
        if !self.endpoints.is_empty() {
            if let Err(e) = self.teardown() {
                error!(error = %e, "Failed to close endpoints before reconnecting.");
            }
        }

        let mut endpoints = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let transport = match connector.connect(addr, settings) {
                Ok(transport) => transport,
                Err(source @ TransportError::Tls(_)) => {
                    return Err(ConnectError::Tls { addr: addr.to_string(), source });
                }
                Err(e) => {
                    error!(%addr, error = %e, "Failed to connect to endpoint.");
                    continue;
                }
            };

            let mut endpoint = Endpoint::new(addr.clone(), transport);
            if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
                if let Err(e) = endpoint.create_namespace(namespace) {
                    error!(%addr, database = namespace, error = %e, "Failed to create database.");
                }
            }

            debug!(%addr, kind = %endpoint.kind(), "Connected to endpoint.");
            endpoints.push(endpoint);
        }

        if endpoints.is_empty() {
            return Err(ConnectError::NoUsableEndpoints { attempted: addrs.len() });
        }

        self.endpoints = endpoints;
        Ok(())
    }

    /// Closes every endpoint and empties the pool.
    ///
    /// # Errors
    ///
    /// If any endpoint failed to close, a single error combining every failure is returned. The pool is emptied
    /// regardless.
    pub fn teardown(&mut self) -> Result<(), CloseError> {
        let mut errors = Vec::new();
        for mut endpoint in self.endpoints.drain(..) {
            if let Err(e) = endpoint.close() {
                error!(addr = %endpoint.addr, error = %e, "Failed to close endpoint.");
                errors.push(format!("{}: {e}", endpoint.addr));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CloseError { errors })
        }
    }

    /// Returns the number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` if the pool holds no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns the endpoints.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Returns a mutable reference to the endpoint at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(index)
    }
}
