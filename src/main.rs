use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    obis_bridge::app().await
}
