use anyhow::Result;

use sqlperf_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("sqlperf-daemon")?;
    sqlperf_daemon::server::run().await
}
