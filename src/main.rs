#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // also captures `log` records from the registry and consensus engine
    tracing_subscriber::fmt().with_target(false).init();
    agri_ledger::run().await
}
