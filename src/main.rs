#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledger_historian::node::run_cli().await
}
