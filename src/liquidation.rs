//! Liquidation price, breach detection and distance-to-liquidation.
//!
//! A position is liquidated when the quote crosses the price at which its margin
//! is (almost) exhausted. The security margin moves that threshold slightly toward
//! the entry price so forced closure triggers before equity reaches zero.

use crate::types::{Leverage, Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Calculates the price at which a position gets liquidated.
///
/// `None` when the result is not a positive price the engine can carry: a zero
/// security margin at 1x, an entry so small the product rounds to zero, or one
/// so large it overflows.
pub fn calculate_liquidation_price(
    entry_price: Price,
    leverage: Leverage,
    side: Side,
    security_margin: Decimal,
) -> Option<Price> {
    let imf = leverage.initial_margin_fraction();

    let factor = match side {
        Side::Long => Decimal::ONE - imf + security_margin,
        Side::Short => Decimal::ONE + imf - security_margin,
    };

    Price::new(entry_price.value().checked_mul(factor)?)
}

/// Long breaches at or below its liquidation price, short at or above.
pub fn is_breached(side: Side, liquidation_price: Price, current_price: Price) -> bool {
    match side {
        Side::Long => current_price <= liquidation_price,
        Side::Short => current_price >= liquidation_price,
    }
}

/// How far the quote can still move against the position, in percent of the quote.
/// negative once breached. saturates at `Decimal::MAX` / `Decimal::MIN` for extreme quotes.
pub fn liquidation_distance_pct(side: Side, liquidation_price: Price, current_price: Price) -> Decimal {
    let gap = match side {
        Side::Long => current_price.value() - liquidation_price.value(),
        Side::Short => liquidation_price.value() - current_price.value(),
    };
    let saturated = if gap.is_sign_negative() { Decimal::MIN } else { Decimal::MAX };
    gap.checked_div(current_price.value())
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .unwrap_or(saturated)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Safe { distance_pct: Decimal },
    AtRisk { distance_pct: Decimal },
    Breached,
}

pub fn evaluate_liquidation(
    side: Side,
    liquidation_price: Price,
    current_price: Price,
    high_risk_distance_pct: Decimal,
) -> LiquidationStatus {
    if is_breached(side, liquidation_price, current_price) {
        return LiquidationStatus::Breached;
    }

    let distance_pct = liquidation_distance_pct(side, liquidation_price, current_price);
    if distance_pct < high_risk_distance_pct {
        LiquidationStatus::AtRisk { distance_pct }
    } else {
        LiquidationStatus::Safe { distance_pct }
    }
}
