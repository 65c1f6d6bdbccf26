/// Entry point for usi-broker
///
/// This is a thin wrapper that delegates to the library crate.
/// All application code lives in lib.rs.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    usi_broker_lib::run().await
}
