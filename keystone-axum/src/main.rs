use anyhow::Result;
use keystone_axum::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    let addr = config.bind_addr();

    let app = keystone_axum::build(config).await?;

    println!("[keystone] listening on http://{addr}");

    app.listen(addr).await?;

    Ok(())
}
