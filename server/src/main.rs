use std::error::Error;
use std::sync::Arc;

use chrono::{NaiveTime, Utc};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use parkpass_server::clock::SystemClock;
use parkpass_server::collaborators::{LogNotifier, SimulatedProvider};
use parkpass_server::config::Config;
use parkpass_server::models::{Money, Park};
use parkpass_server::routes::create_routes;
use parkpass_server::services::{maintenance, Services};
use parkpass_server::state::AppState;
use parkpass_server::store::{MemoryStore, PgStore, Store};

const DEMO_PARK_ID: Uuid = Uuid::from_u128(0x5f0e_2c1a_9b7d_4e3f_8a61_0c2d_7e94_b3a1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parkpass_server=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            tracing::info!("Successfully connected to database");

            let store = PgStore::new(pool);
            store.migrate().await?;
            tracing::info!("Migrations run successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store with demo data");
            let store = MemoryStore::new();
            store.upsert_park(&demo_park()).await?;
            Arc::new(store)
        }
    };

    let services = Services::new(
        store,
        Arc::clone(&config),
        Arc::new(SystemClock),
        Arc::new(LogNotifier),
        Arc::new(SimulatedProvider::new()),
    );
    let sweeper = maintenance::spawn(services.clone(), config.sweep_interval);

    let app = create_routes(AppState::new(services, Arc::clone(&config)));

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server running at http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn demo_park() -> Park {
    let now = Utc::now();
    Park {
        id: DEMO_PARK_ID,
        name: "Demo Park".to_string(),
        country_code: "KZ".to_string(),
        opens_at: NaiveTime::MIN + chrono::Duration::hours(10),
        closes_at: NaiveTime::MIN + chrono::Duration::hours(20),
        slot_minutes: 120,
        slot_capacity: 50,
        adult_price: Money::new(300),
        created_at: now,
        updated_at: now,
    }
}
