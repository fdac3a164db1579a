mod cloud;
mod control;
mod error;
#[cfg(test)]
mod fake_cloud;
mod host;
mod telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
