#[tokio::main]
async fn main() -> anyhow::Result<()> {
    plategate_lib::run().await
}
