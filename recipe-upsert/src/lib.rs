//! HTTP endpoint that merges submitted recipes into a JSON collection kept
//! in a versioned content store.

pub mod auth;
pub mod collection;
pub mod config;
pub mod cors;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod recipe;
mod service;
pub mod store;
pub mod sync;

use errors::UpsertError;
use handler::UpsertHandler;
use service::UpsertService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<(), UpsertError> {
    config.validate()?;
    tracing::info!(config = ?config, "Starting recipe upsert service");

    let handler = Arc::new(UpsertHandler::from_config(&config));

    let ready_handler = handler.clone();
    let admin_service = AdminService::new(move || ready_handler.is_ready());

    let upsert_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        UpsertService::new(handler),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(upsert_task, admin_task)?;
    Ok(())
}
