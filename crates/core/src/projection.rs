//! In-memory projection of a request onto a position.
//!
//! `project` is a pure function: it clones the snapshot, applies the amount
//! and recomputes the aggregates. Nothing here touches the chain.

use concierge_chain::InterestRateMode;
use serde::Serialize;

use crate::action::{ActionRequest, Operation};
use crate::position::Position;
use crate::u256_math::{self, NO_DEBT_HEALTH_FACTOR};

/// A position as it would look after the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub operation: Operation,
    /// Token units actually applied (repay is capped at outstanding debt)
    pub applied_units: f64,
    /// USD value of `applied_units`
    pub value_usd: f64,
    /// Rate mode for borrow and repay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_mode: Option<InterestRateMode>,
    pub health_factor_before: f64,
    pub position: Position,
}

impl Projection {
    pub fn health_factor_after(&self) -> f64 {
        self.position.health_factor
    }
}

/// Health factor from aggregates: `collateral * threshold / debt`.
pub fn health_factor(collateral_usd: f64, liquidation_threshold: f64, debt_usd: f64) -> f64 {
    if debt_usd <= 0.0 {
        NO_DEBT_HEALTH_FACTOR
    } else {
        collateral_usd * liquidation_threshold / debt_usd
    }
}

/// Apply `request` to a copy of `position`.
///
/// Returns `None` when the request's asset is not part of the position.
pub fn project(position: &Position, request: &ActionRequest) -> Option<Projection> {
    let mut projected = position.clone();
    let reserve = projected.reserve_mut(request.asset())?;

    let price = reserve.price_usd;
    let decimals = reserve.decimals;
    let requested = request.amount().max(0.0);

    let (applied_units, rate_mode) = match request.operation() {
        Operation::Supply => {
            // A first supply turns collateral on; topping up a reserve the
            // holder switched off leaves it off.
            let counts_as_collateral = reserve.collateral_enabled || reserve.supplied.is_zero();
            reserve.supplied = reserve
                .supplied
                .saturating_add(raw_amount(requested, decimals));
            if counts_as_collateral {
                reserve.collateral_enabled = true;
                let (collateral, threshold) =
                    projected_collateral(position, requested * price, reserve.liquidation_threshold);
                projected.total_collateral_usd = collateral;
                projected.liquidation_threshold = threshold;
            }
            (requested, None)
        }
        Operation::Borrow => {
            let mode = request.rate_mode().unwrap_or(InterestRateMode::Variable);
            let raw = raw_amount(requested, decimals);
            match mode {
                InterestRateMode::Stable => reserve.stable_debt = reserve.stable_debt.saturating_add(raw),
                InterestRateMode::Variable => reserve.variable_debt = reserve.variable_debt.saturating_add(raw),
            }
            let value = requested * price;
            projected.total_debt_usd += value;
            projected.available_borrows_usd = (projected.available_borrows_usd - value).max(0.0);
            (requested, Some(mode))
        }
        Operation::Repay => {
            let mode = reserve.repay_mode(request.rate_mode());
            let outstanding = reserve.debt(mode);
            let raw = u256_math::min(raw_amount(requested, decimals), outstanding);
            let units = requested.min(reserve.debt_units(mode));
            match mode {
                InterestRateMode::Stable => reserve.stable_debt = reserve.stable_debt.saturating_sub(raw),
                InterestRateMode::Variable => reserve.variable_debt = reserve.variable_debt.saturating_sub(raw),
            }
            projected.total_debt_usd = (projected.total_debt_usd - units * price).max(0.0);
            (units, Some(mode))
        }
    };

    projected.health_factor = health_factor(
        projected.total_collateral_usd,
        projected.liquidation_threshold,
        projected.total_debt_usd,
    );

    Some(Projection {
        operation: request.operation(),
        applied_units,
        value_usd: applied_units * price,
        rate_mode,
        health_factor_before: position.health_factor,
        position: projected,
    })
}

/// New collateral total and weighted threshold after adding `value` USD of
/// an asset with threshold `asset_lt`: `(C*LT + v*LT_asset) / (C + v)`.
fn projected_collateral(position: &Position, value: f64, asset_lt: f64) -> (f64, f64) {
    let collateral = position.total_collateral_usd;
    let total = collateral + value;
    if total <= 0.0 {
        return (0.0, position.liquidation_threshold);
    }
    let weighted = (collateral * position.liquidation_threshold + value * asset_lt) / total;
    (total, weighted)
}

fn raw_amount(units: f64, decimals: u8) -> alloy::primitives::U256 {
    u256_math::parse_units(units, decimals).unwrap_or_default()
}
