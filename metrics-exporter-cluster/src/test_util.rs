use std::sync::Arc;

use mockall::mock;
use parking_lot::Mutex;

use crate::endpoint::{
    Connector, Endpoint, EndpointPool, EndpointSettings, RemoteAddr, Transport, TransportError, TransportKind,
};

mock! {
    pub Transport {}

    impl Transport for Transport {
        fn kind(&self) -> TransportKind;
        fn write(&mut self, payload: &[u8]) -> Result<(), TransportError>;
        fn create_namespace(&mut self, name: &str) -> Result<(), TransportError>;
        fn close(&mut self) -> Result<(), TransportError>;
    }
}

mock! {
    pub Connector {}

    impl Connector for Connector {
        fn connect(&self, addr: &RemoteAddr, settings: &EndpointSettings) -> Result<Box<dyn Transport>, TransportError>;
    }
}

/// How a scripted endpoint answers writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Reject,
    DatabaseNotFound,
}

impl Outcome {
    fn into_result(self) -> Result<(), TransportError> {
        match self {
            Outcome::Accept => Ok(()),
            Outcome::Reject => Err(TransportError::Status { status: 500, body: "internal error".to_string() }),
            Outcome::DatabaseNotFound => Err(TransportError::Status {
                status: 404,
                body: r#"{"error":"database not found: \"telegraf\""}"#.to_string(),
            }),
        }
    }
}

/// Every operation performed against scripted endpoints, in order, as `(endpoint name, operation)`.
pub type CallLog = Arc<Mutex<Vec<(String, &'static str)>>>;

/// Creates a transport that answers every write with `outcome` and records its calls into `log`.
pub fn scripted_transport(name: &str, outcome: Outcome, log: &CallLog) -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_kind().return_const(TransportKind::Http);

    let (write_name, write_log) = (name.to_string(), Arc::clone(log));
    transport.expect_write().returning(move |_| {
        write_log.lock().push((write_name.clone(), "write"));
        outcome.into_result()
    });

    let (ns_name, ns_log) = (name.to_string(), Arc::clone(log));
    transport.expect_create_namespace().returning(move |_| {
        ns_log.lock().push((ns_name.clone(), "create_namespace"));
        Ok(())
    });

    transport.expect_close().returning(|| Ok(()));
    transport
}

/// Creates a pool of scripted endpoints named after their outcomes' positions (`a`, `b`, ...).
pub fn scripted_pool(outcomes: &[Outcome], log: &CallLog) -> EndpointPool {
    let endpoints = outcomes
        .iter()
        .zip('a'..='z')
        .map(|(outcome, name)| {
            let name = name.to_string();
            let addr = RemoteAddr::Http(format!("http://{name}:8086"));
            Endpoint::new(addr, Box::new(scripted_transport(&name, *outcome, log)))
        })
        .collect();

    EndpointPool::from_endpoints(endpoints)
}

/// Returns the names of the endpoints that performed `operation`, in order.
pub fn calls(log: &CallLog, operation: &str) -> Vec<String> {
    log.lock().iter().filter(|(_, op)| *op == operation).map(|(name, _)| name.clone()).collect()
}
