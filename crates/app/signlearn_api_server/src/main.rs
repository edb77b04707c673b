//! SignLearn auth API server binary.

use std::sync::Arc;

use clap::Parser;
use signlearn_api::AppState;
use signlearn_api::config::ApiConfig;
use signlearn_api::services::federation::Federation;
use signlearn_api::services::mail::{LogMailer, Mailer, SmtpMailer};
use signlearn_core::auth::queries::PgUserStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments; everything else comes from the environment.
#[derive(Parser, Debug)]
#[command(name = "signlearn_api_server", about = "SignLearn auth API server")]
struct Args {
    /// Port to listen on. Overrides the port in `BIND_ADDR`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/signlearn"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

fn bind_addr(configured: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => {
            let host = configured
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("127.0.0.1");
            format!("{host}:{port}")
        }
        None => configured.to_string(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,signlearn_api=debug,signlearn_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    config.bind_addr = bind_addr(&config.bind_addr, args.port);
    config.database_url = args.database_url;

    info!(
        max_connections = args.max_connections,
        "configuring connection pool"
    );
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    signlearn_api::migrate(&pool).await?;

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => {
            info!(server = %mail.server, port = mail.port, "smtp mail enabled");
            Arc::new(SmtpMailer::new(mail, config.upstream_timeout)?)
        }
        None => {
            warn!("MAIL_SERVER not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };
    let federation = Federation::from_config(&config);
    info!(
        google = config.google.is_some(),
        facebook = config.facebook.is_some(),
        "oauth providers"
    );

    let bind = config.bind_addr.clone();
    let state = AppState::new(config, Arc::new(PgUserStore::new(pool)), mailer, federation);
    state.spawn_cleanup_tasks();

    let app = signlearn_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
