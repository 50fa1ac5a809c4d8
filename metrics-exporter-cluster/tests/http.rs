#![cfg(feature = "http")]

use std::{
    net::{TcpListener, UdpSocket},
    time::{Duration, UNIX_EPOCH},
};

use metrics_exporter_cluster::{ClusterBuilder, Metric, RepairPolicy, WriteError};
use mockito::{Matcher, Server};

fn batch() -> Vec<Metric> {
    let ts = UNIX_EPOCH + Duration::from_secs(1);
    vec![
        Metric::new("cpu", ts).with_tag("host", "a").with_field("usage", 0.5),
        Metric::new("mem", ts).with_tag("host", "a").with_field("used", 1024i64),
    ]
}

const PAYLOAD: &str = "cpu,host=a usage=0.5 1000000000\nmem,host=a used=1024i 1000000000\n";
const DATABASE_NOT_FOUND: &str = r#"{"error":"database not found: \"telegraf\""}"#;
const QUERY_OK: &str = r#"{"results":[{"statement_id":0}]}"#;

fn write_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("db".into(), "telegraf".into()),
        Matcher::UrlEncoded("precision".into(), "ns".into()),
    ])
}

#[test]
fn writes_batch_and_creates_database_on_connect() {
    let mut server = Server::new();
    let create = server
        .mock("POST", "/query")
        .match_body(Matcher::UrlEncoded("q".into(), "CREATE DATABASE \"telegraf\"".into()))
        .with_status(200)
        .with_body(QUERY_OK)
        .expect(1)
        .create();
    let write = server
        .mock("POST", "/write")
        .match_query(write_query())
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .match_header("content-type", "text/plain; charset=utf-8")
        .match_body(PAYLOAD)
        .with_status(204)
        .expect(2)
        .create();

    let mut writer = ClusterBuilder::influxdb()
        .with_urls([server.url()])
        .with_credentials("user", Some("pass"))
        .build()
        .expect("failed to build writer");

    writer.write(&batch()).expect("write should succeed");
    writer.write(&batch()).expect("write should succeed");

    create.assert();
    write.assert();
    writer.close().expect("failed to close writer");
}

#[test]
fn recreates_missing_database_once() {
    let mut server = Server::new();
    let create = server.mock("POST", "/query").with_status(200).with_body(QUERY_OK).expect(2).create();
    let write = server
        .mock("POST", "/write")
        .match_query(write_query())
        .with_status(404)
        .with_body(DATABASE_NOT_FOUND)
        .expect(1)
        .create();

    let mut writer = ClusterBuilder::influxdb().with_urls([server.url()]).build().expect("failed to build writer");

    let result = writer.write(&batch());
    assert!(matches!(result, Err(WriteError::AllEndpointsFailed { attempted: 1 })));

    // Once when connecting, once more when the write reported the database missing.
    create.assert();
    write.assert();
}

#[test]
fn retries_after_repair_when_configured() {
    let mut server = Server::new();
    let create = server.mock("POST", "/query").with_status(200).with_body(QUERY_OK).expect(2).create();
    let missing = server
        .mock("POST", "/write")
        .match_query(write_query())
        .with_status(404)
        .with_body(DATABASE_NOT_FOUND)
        .expect(1)
        .create();
    let accepted = server
        .mock("POST", "/write")
        .match_query(write_query())
        .match_body(PAYLOAD)
        .with_status(204)
        .expect(1)
        .create();

    let mut writer = ClusterBuilder::influxdb()
        .with_urls([server.url()])
        .with_repair_policy(RepairPolicy::RetryAfterRepair)
        .build()
        .expect("failed to build writer");

    writer.write(&batch()).expect("write should succeed after repair");

    create.assert();
    missing.assert();
    accepted.assert();
}

#[test]
fn fails_over_to_healthy_server() {
    let mut broken = Server::new();
    let broken_create = broken.mock("POST", "/query").with_status(200).with_body(QUERY_OK).create();
    let broken_write = broken
        .mock("POST", "/write")
        .with_status(500)
        .with_body(r#"{"error":"timeout"}"#)
        .expect_at_most(1)
        .create();

    let mut healthy = Server::new();
    let healthy_create = healthy.mock("POST", "/query").with_status(200).with_body(QUERY_OK).create();
    let healthy_write = healthy.mock("POST", "/write").match_body(PAYLOAD).with_status(204).expect(1).create();

    let mut writer = ClusterBuilder::influxdb()
        .with_urls([broken.url(), healthy.url()])
        .build()
        .expect("failed to build writer");

    writer.write(&batch()).expect("healthy server should accept the batch");

    broken_create.assert();
    broken_write.assert();
    healthy_create.assert();
    healthy_write.assert();
}

#[test]
fn all_servers_failing_drops_batch() {
    let mut servers: Vec<_> = (0..3).map(|_| Server::new()).collect();
    let mut mocks = Vec::new();
    for server in &mut servers {
        mocks.push(server.mock("POST", "/query").with_status(200).with_body(QUERY_OK).expect(1).create());
        mocks.push(server.mock("POST", "/write").with_status(500).with_body("overloaded").expect(1).create());
    }

    let mut writer = ClusterBuilder::influxdb()
        .with_urls(servers.iter().map(|server| server.url()))
        .build()
        .expect("failed to build writer");

    let err = writer.write(&batch()).unwrap_err();
    assert_eq!(err.to_string(), "could not write to any server in cluster");

    // Every server was tried exactly once.
    for mock in mocks {
        mock.assert();
    }
}

#[test]
fn stalled_server_times_out_and_fails_over() {
    // Accepts connections from its backlog but never answers a request.
    let stalled = TcpListener::bind("127.0.0.1:0").unwrap();
    let stalled_url = format!("http://{}", stalled.local_addr().unwrap());

    let mut healthy = Server::new();
    let _create = healthy.mock("POST", "/query").with_status(200).with_body(QUERY_OK).create();
    let healthy_write = healthy.mock("POST", "/write").match_body(PAYLOAD).with_status(204).expect(4).create();

    let mut writer = ClusterBuilder::influxdb()
        .with_urls([stalled_url, healthy.url()])
        .with_timeout(Duration::from_millis(200))
        .build()
        .expect("failed to build writer");

    // Whichever order the endpoints are tried in, the healthy server ends up with every batch.
    for _ in 0..4 {
        writer.write(&batch()).expect("healthy server should accept the batch");
    }
    assert_eq!(writer.endpoints().len(), 2);

    healthy_write.assert();
}

#[test]
fn oversized_datagram_fails_over_to_http() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let udp_url = format!("udp://{}", receiver.local_addr().unwrap());

    let mut server = Server::new();
    let _create = server.mock("POST", "/query").with_status(200).with_body(QUERY_OK).create();
    let write = server.mock("POST", "/write").match_body(PAYLOAD).with_status(204).expect(3).create();

    // Each line of the batch is larger than a single datagram.
    let mut writer = ClusterBuilder::influxdb()
        .with_urls([udp_url, server.url()])
        .with_udp_payload_size(16)
        .build()
        .expect("failed to build writer");

    for _ in 0..3 {
        writer.write(&batch()).expect("HTTP server should accept the batch");
    }

    write.assert();
    let mut buf = [0u8; 64];
    assert!(receiver.recv(&mut buf).is_err(), "no partial batch should reach the UDP endpoint");
}
