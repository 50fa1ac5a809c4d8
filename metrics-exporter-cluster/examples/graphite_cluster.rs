use std::time::{Duration, SystemTime};

use metrics_exporter_cluster::{ClusterBuilder, Metric};

fn main() {
    tracing_subscriber::fmt::init();

    let mut writer = ClusterBuilder::graphite()
        .with_urls(["localhost:2003", "tcp://localhost:2004"])
        .with_graphite_prefix("example")
        .with_graphite_template("host.measurement.tags.field")
        .build()
        .expect("failed to build writer");

    let mut requests = 0u64;
    for _ in 0..30 {
        requests += 17;

        let metric = Metric::new("http", SystemTime::now())
            .with_tag("host", "web-01")
            .with_tag("region", "us-east-1")
            .with_field("requests", requests)
            .with_field("latency_ms", 12.5);

        if let Err(e) = writer.write(&[metric]) {
            eprintln!("dropped batch: {e}");
        }

        std::thread::sleep(Duration::from_secs(2));
    }

    writer.close().expect("failed to close writer");
}
