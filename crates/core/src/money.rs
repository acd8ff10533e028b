//! Monetary arithmetic for escrow payments.
//!
//! The ledger stores decimal currency units (2 dp); the payment gateway
//! speaks integer minor units (cents). All rounding is half-up to 2 decimal
//! places. Rounding differences between the platform fee and the provider
//! amount are absorbed into the provider amount, so
//! `platform_fee + provider_amount == amount` holds exactly.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::CoreError;

/// Platform commission applied to every payment: 10%.
pub const PLATFORM_FEE_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// The fee split of a payment amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub platform_fee: Decimal,
    pub provider_amount: Decimal,
}

/// Round a decimal amount half-up to 2 decimal places.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the platform fee and provider amount for a payment amount.
///
/// `platform_fee = round(amount * 0.10, 2)`; the provider amount is the
/// exact remainder, so the two always sum back to `amount`.
pub fn fee_split(amount: Decimal) -> FeeSplit {
    let platform_fee = round2(amount * PLATFORM_FEE_RATE);
    FeeSplit {
        platform_fee,
        provider_amount: amount - platform_fee,
    }
}

/// Convert a decimal currency amount to integer minor units (cents).
///
/// Fails on amounts that do not fit in an `i64` after scaling.
pub fn to_minor_units(amount: Decimal) -> Result<i64, CoreError> {
    let scaled = round2(amount) * Decimal::ONE_HUNDRED;
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| CoreError::Validation(format!("Amount {amount} out of range")))
}

/// Convert integer minor units (cents) back to a decimal currency amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
