#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamcache::run().await
}
