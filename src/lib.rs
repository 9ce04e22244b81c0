pub mod adapters;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod handlers;
pub mod health;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod validation;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::clock::Clock;
use crate::health::HealthChecks;
use crate::services::{SettlementService, TransactionOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub settlement: Arc<SettlementService>,
    pub health: Arc<HealthChecks>,
    pub webhook_secret: Arc<str>,
    pub clock: Arc<dyn Clock>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/quotes", post(handlers::sends::create_quote))
        .route("/sends", post(handlers::sends::create_send))
        .route("/webhooks/exchange", post(handlers::webhook::exchange_callback))
        .with_state(state)
}
