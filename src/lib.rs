pub mod analyzer;
pub mod auth;
pub mod backend;
pub mod bus;
pub mod cache;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod query;
pub mod rate_limit;
pub mod results;
pub mod routes;
pub mod scorer;

use config::ServiceConfig;
use orchestrator::ServiceOrchestrator;
use rocket_cors::CorsOptions;
use std::env;
use std::sync::Arc;

/// Installs a `tracing` subscriber honoring `log_level`/`log_format`
/// (spec.md §6 "logging setup" is an external collaborator; this process
/// still has to configure its own output).
fn init_tracing(config: &ServiceConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.log_format == "json" { subscriber.json().try_init() } else { subscriber.try_init() };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = ServiceConfig::from_env();
    build_rocket(config)
}

pub fn build_rocket(config: ServiceConfig) -> rocket::Rocket<rocket::Build> {
    init_tracing(&config);

    let port: u16 = env::var("ROCKET_PORT").unwrap_or_else(|_| "8000".to_string()).parse().unwrap_or(8000);

    let orchestrator = ServiceOrchestrator::initialize(config).expect("failed to initialize service orchestrator");

    let cors = CorsOptions::default().to_cors().expect("failed to build CORS fairing");

    rocket::build()
        .manage(Arc::clone(&orchestrator))
        .attach(cors)
        .register("/", rocket::catchers![routes::too_many_requests, routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::metrics,
                routes::search_notes,
                routes::search_users,
                routes::trending_hashtags,
                routes::trending_users,
                routes::suggestions,
                routes::autocomplete,
                routes::stream,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Service Orchestrator Startup", move |_rocket| {
            Box::pin(async move {
                let mdns_handle = orchestrator.start(port).await;
                if let Some(handle) = mdns_handle {
                    tracing::info!(service = handle.fullname(), "service discovery registered");
                    // Kept alive for the process lifetime; dropped on process exit.
                    std::mem::forget(handle);
                }
            })
        }))
        .attach(rocket::fairing::AdHoc::on_shutdown("Service Orchestrator Shutdown", |rocket| {
            Box::pin(async move {
                if let Some(orchestrator) = rocket.state::<Arc<ServiceOrchestrator>>() {
                    orchestrator.stop().await;
                }
            })
        }))
}
