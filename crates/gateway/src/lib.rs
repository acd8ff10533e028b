//! Payment gateway adapter.
//!
//! Wraps the external card/bank payment provider behind the
//! [`PaymentGateway`] trait: payment intent creation and updates, charge
//! retrieval, refunds, and inbound webhook verification. Monetary values
//! cross this boundary as integer minor units (cents); the ledger side
//! works in decimals.

pub mod client;
pub mod mock;
pub mod webhook;

pub use client::{
    GatewayError, HttpPaymentGateway, IntentDetails, IntentHandle, PaymentGateway, RefundHandle,
};
pub use mock::MockPaymentGateway;
pub use webhook::{verify_signature, DisputeVerdict, GatewayEventType, SignatureError, WebhookEvent};
