use std::sync::Arc;

use worklane_gateway::PaymentGateway;

use crate::config::ServerConfig;
use crate::engine::{ApprovalEngine, DisputeEngine, EscrowEngine};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: worklane_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Outbound payment gateway client.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Centralized event bus for publishing platform events.
    pub event_bus: Arc<worklane_events::EventBus>,
}

impl AppState {
    /// Milestone approval coordinator bound to this state.
    pub fn approval(&self) -> ApprovalEngine {
        ApprovalEngine::new(self.pool.clone(), Arc::clone(&self.event_bus))
    }

    /// Escrow payment engine bound to this state.
    pub fn escrow(&self) -> EscrowEngine {
        EscrowEngine::new(
            self.pool.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.event_bus),
        )
    }

    /// Dispute resolution engine bound to this state.
    pub fn dispute(&self) -> DisputeEngine {
        DisputeEngine::new(
            self.pool.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.event_bus),
        )
    }
}
