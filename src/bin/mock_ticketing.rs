//! Stand-alone mock ticketing service, for local stacks where the agent
//! needs a ServiceNow-shaped incident table to talk to.

use tracing::info;
use tracing_subscriber::EnvFilter;

use trustagent::ticketing::mock::MockTicketing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = std::env::var("TICKETING_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8001);

    let app = MockTicketing::new().router();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("mock ticketing service listening on :{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
