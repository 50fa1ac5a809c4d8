use std::time::{Duration, SystemTime};

use metrics_exporter_cluster::{ClusterBuilder, Metric, RepairPolicy};
use rand::Rng as _;

fn main() {
    tracing_subscriber::fmt::init();

    let mut writer = ClusterBuilder::influxdb()
        .with_urls(["http://localhost:8086", "http://localhost:8087"])
        .with_database("example")
        .with_retention_policy("autogen")
        .with_repair_policy(RepairPolicy::RetryAfterRepair)
        .with_debug_filter("host=web-01")
        .build()
        .expect("failed to build writer");

    let mut rng = rand::rng();
    loop {
        let now = SystemTime::now();
        let batch: Vec<_> = ["web-01", "web-02", "db-01"]
            .into_iter()
            .map(|host| {
                Metric::new("cpu", now)
                    .with_tag("host", host)
                    .with_field("usage_user", rng.random_range(0.0f64..100.0))
                    .with_field("usage_system", rng.random_range(0.0f64..100.0))
            })
            .collect();

        // Failures are logged per endpoint; the batch is simply dropped if no endpoint takes it.
        if let Err(e) = writer.write(&batch) {
            eprintln!("dropped batch: {e}");
        }

        std::thread::sleep(Duration::from_secs(10));
    }
}
