//! Continuous control monitoring agent.
//!
//! On startup the agent loads (or generates) its Ed25519 keypair, reads
//! the control and product definitions, waits for Postgres, the IdP, and
//! the ticketing service, ensures the database schema, reconstructs the
//! Merkle log from persisted leaf hashes, and then evaluates every
//! configured control each cycle, forever.

use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trustagent::agent::{run_cycle, AgentContext};
use trustagent::bootstrap::{wait_for, CORE_DEADLINE, TICKETING_DEADLINE};
use trustagent::config::{load_controls, load_products, Settings};
use trustagent::crypto::keys::KeyPair;
use trustagent::crypto::merkle::MerkleLog;
use trustagent::idp::KeycloakClient;
use trustagent::store::Store;
use trustagent::ticketing::TicketingClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("trustagent starting …");

    let settings = Settings::from_env();
    let controls =
        load_controls(&settings.config_path).context("loading control definitions")?;
    let products =
        load_products(&settings.products_path).context("loading product definitions")?;
    let interval = Duration::from_secs(controls.agent.run_interval_seconds);

    let keys = KeyPair::load_or_generate(
        &settings.key_dir.join("signing_key.pem"),
        &settings.key_dir.join("signing_key.pub.pem"),
    )
    .context("preparing signing keys")?;
    info!("Ed25519 public key: {}", keys.public_key_hex());

    let idp = KeycloakClient::new(
        &settings.keycloak_url,
        &controls.agent.realm,
        &settings.keycloak_admin,
        &settings.keycloak_admin_pass,
    );
    let ticketing = TicketingClient::new(&settings.ticketing_url);

    let mut store = wait_for("postgres", CORE_DEADLINE, || async {
        Store::connect(&settings.postgres_dsn)
    })
    .await
    .context("waiting for postgres")?;
    wait_for("keycloak", CORE_DEADLINE, || idp.ping())
        .await
        .context("waiting for the identity provider")?;
    wait_for("ticketing", TICKETING_DEADLINE, || ticketing.ping())
        .await
        .context("waiting for the ticketing service")?;

    store.ensure_schema().context("ensuring database schema")?;

    let mut merkle = MerkleLog::new();
    for leaf_hash in store.get_evidence_leaf_hashes().context("loading merkle leaves")? {
        merkle.append_leaf_hash(leaf_hash);
    }
    info!(
        "merkle log reconstructed: {} existing leaves, root={}",
        merkle.count(),
        merkle.root().as_deref().map(|r| &r[..16]).unwrap_or("empty")
    );

    info!("all dependencies ready, run interval: {}s", interval.as_secs());

    let ctx = AgentContext { controls, products, keys, idp, ticketing };

    loop {
        if let Err(e) = run_cycle(&ctx, &mut store, &mut merkle).await {
            error!("cycle hit a store failure: {e}; reconnecting to postgres");
            drop(store);
            store = wait_for("postgres", CORE_DEADLINE, || async {
                Store::connect(&settings.postgres_dsn)
            })
            .await
            .context("reconnecting to postgres")?;
        }

        info!("sleeping {}s until next run …", interval.as_secs());
        tokio::time::sleep(interval).await;
    }
}
