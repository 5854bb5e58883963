use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use clap::Parser;
use medichat::api::middleware::ApiKeyAuth;
use medichat::cli::{commands::{Cli, Commands}, run_cli};
use medichat::config::AppConfig;
use medichat::consultation::ConsultationService;
use medichat::db::{self, service::DbService};
use medichat::store::DuckDbStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Serve) {
        if let Err(e) = run_cli(cli.command, cli.config).await {
            error!("{}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("Starting Medichat consultation server...");

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db_pool = match db::get_connection(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let seeded = match db_pool.lock() {
        Ok(conn) => DbService::seed_experts(&conn, &config.experts),
        Err(_) => {
            error!("Database lock poisoned during startup");
            std::process::exit(1);
        }
    };
    match seeded {
        Ok(0) => {}
        Ok(n) => info!("Seeded {} AI experts", n),
        Err(e) => {
            error!("Failed to seed experts: {}", e);
            std::process::exit(1);
        }
    }

    let store = Arc::new(DuckDbStore::new(db_pool.clone()));
    let consultations = web::Data::new(ConsultationService::new(store, config.consultation.clone()));

    if config.consultation.idle_timeout_secs > 0 {
        let max_idle = Duration::from_secs(config.consultation.idle_timeout_secs);
        let registry = consultations.clone();
        actix_web::rt::spawn(async move {
            let mut ticker = actix_web::rt::time::interval(max_idle.min(Duration::from_secs(60)));
            loop {
                ticker.tick().await;
                let evicted = registry.evict_idle(max_idle).await;
                if evicted > 0 {
                    info!("Evicted {} idle consultations", evicted);
                }
            }
        });
    }

    let host = config.server.host.clone();
    let port = config.server.port;

    info!("Server listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(consultations.clone())
            .route("/health", web::get().to(health))
            .wrap(ApiKeyAuth)
            .configure(medichat::api::routes::configure)
            .configure(medichat::api::websocket::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
