pub mod adapters;
pub mod allocation;
pub mod bankdata;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod processor;
pub mod services;
pub mod startup;
pub mod testing;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::adapters::{
    PostgresAgreementRepository, PostgresLedgerRepository, PostgresTransferRepository,
    PostgresVendorRepository,
};
use crate::config::Config;
use crate::ports::{
    AgreementRepository, LedgerRepository, LogNotifier, TransferRepository, VendorRepository,
};
use crate::processor::ProcessorClient;
use crate::services::{
    AgreementStore, ReconciliationService, TransferOrchestrator, TriggerDetector, VendorResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub webhook_secret: String,
    pub vendor_resolver: Arc<VendorResolver>,
    pub agreement_store: Arc<AgreementStore>,
    pub trigger_detector: Arc<TriggerDetector>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub reconciliation: Arc<ReconciliationService>,
    pub agreements: Arc<dyn AgreementRepository>,
    pub transfers: Arc<dyn TransferRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
}

/// Wire the Postgres adapters, processor client, and services into one
/// application state.
pub fn build_state(config: &Config, pool: sqlx::PgPool) -> AppState {
    let vendors: Arc<dyn VendorRepository> =
        Arc::new(PostgresVendorRepository::new(pool.clone()));
    let agreements: Arc<dyn AgreementRepository> =
        Arc::new(PostgresAgreementRepository::new(pool.clone()));
    let transfers: Arc<dyn TransferRepository> =
        Arc::new(PostgresTransferRepository::new(pool.clone()));
    let ledger: Arc<dyn LedgerRepository> = Arc::new(PostgresLedgerRepository::new(pool.clone()));

    let processor = Arc::new(ProcessorClient::new(config.processor_base_url.clone()));

    let vendor_resolver = Arc::new(VendorResolver::new(vendors));
    let agreement_store = Arc::new(AgreementStore::new(agreements.clone()));
    let trigger_detector = Arc::new(TriggerDetector::new(
        vendor_resolver.clone(),
        agreements.clone(),
    ));
    let orchestrator = Arc::new(TransferOrchestrator::new(
        agreements.clone(),
        transfers.clone(),
        ledger.clone(),
        processor,
        Arc::new(LogNotifier),
    ));
    let reconciliation = Arc::new(ReconciliationService::new(
        agreements.clone(),
        transfers.clone(),
        orchestrator.clone(),
    ));

    AppState {
        db: pool,
        webhook_secret: config.bank_webhook_secret.clone(),
        vendor_resolver,
        agreement_store,
        trigger_detector,
        orchestrator,
        reconciliation,
        agreements,
        transfers,
        ledger,
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/webhooks/bank/transactions",
            post(handlers::webhook::ingest_transactions),
        )
        .route("/agreements", post(handlers::agreements::create))
        .route("/agreements/:id", get(handlers::agreements::get))
        .route(
            "/agreements/:id/participants",
            get(handlers::agreements::list_participants),
        )
        .route(
            "/agreements/:id/deactivate",
            post(handlers::agreements::deactivate),
        )
        .route(
            "/participants/:id/activate",
            post(handlers::agreements::activate_participant),
        )
        .route("/invites/convert", post(handlers::agreements::convert_invite))
        .route("/transfers/:id", get(handlers::transfers::get))
        .route("/transfers/:id/events", get(handlers::transfers::events))
        .route("/transfers/:id/cancel", post(handlers::transfers::cancel))
        .route("/transfers/withheld", get(handlers::transfers::list_withheld))
        .route("/vendors/:id/review", post(handlers::vendors::review))
        .route("/vendors/associations", post(handlers::vendors::associate))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
