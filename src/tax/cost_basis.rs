use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use uuid::Uuid;

use crate::db::{CostBasisPolicy, TaxLot};
use crate::error::{Error, Result};
use crate::money::{div_round, round_money};

/// Days a lot must be held for its gain to count as long-term
pub const LONG_TERM_DAYS: i64 = 365;

/// One lot's share of a sale
#[derive(Debug, Clone, PartialEq)]
pub struct LotAllocation {
    pub lot_id: Uuid,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub is_long_term: bool,
}

/// Long-term when held at least [`LONG_TERM_DAYS`] days (inclusive).
pub fn is_long_term(purchase_date: NaiveDate, sale_date: NaiveDate) -> bool {
    (sale_date - purchase_date).num_days() >= LONG_TERM_DAYS
}

/// Order lots for consumption under FIFO or LIFO.
///
/// Ties on purchase date fall back to lot creation order in both directions.
pub fn order_lots(lots: &[TaxLot], policy: CostBasisPolicy) -> Vec<&TaxLot> {
    let mut ordered: Vec<&TaxLot> = lots.iter().collect();
    match policy {
        CostBasisPolicy::Lifo => ordered.sort_by(|a, b| {
            b.purchase_date
                .cmp(&a.purchase_date)
                .then(a.acquired_seq.cmp(&b.acquired_seq))
                .then(a.id.cmp(&b.id))
        }),
        CostBasisPolicy::Fifo | CostBasisPolicy::SpecificLot => {
            ordered.sort_by_key(|l| (l.purchase_date, l.acquired_seq, l.id))
        }
    }
    ordered
}

/// Allocate a sale of `quantity` shares against `lots`.
///
/// Under `SpecificLot` the lots named in `selection` are consumed in the given
/// order; an empty selection falls back to FIFO. Does not mutate the lots.
pub fn allocate(
    symbol: &str,
    lots: &[TaxLot],
    quantity: Decimal,
    policy: CostBasisPolicy,
    selection: &[Uuid],
    sale_date: NaiveDate,
) -> Result<Vec<LotAllocation>> {
    if quantity <= Decimal::ZERO {
        return Err(Error::validation("sell quantity must be positive"));
    }

    let available: Decimal = lots.iter().map(|l| l.quantity).sum();
    if available < quantity {
        return Err(Error::InsufficientShares {
            symbol: symbol.to_string(),
            requested: quantity,
            available,
        });
    }

    let ordered: Vec<&TaxLot> = if policy == CostBasisPolicy::SpecificLot && !selection.is_empty()
    {
        select_lots(lots, selection, quantity)?
    } else {
        order_lots(lots, policy)
    };

    let mut remaining = quantity;
    let mut allocations = Vec::new();

    for lot in ordered {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(lot.quantity);
        let cost_basis = if take == lot.quantity {
            lot.cost_basis
        } else {
            round_money(div_round(lot.cost_basis, lot.quantity)? * take)
        };

        allocations.push(LotAllocation {
            lot_id: lot.id,
            purchase_date: lot.purchase_date,
            quantity: take,
            cost_basis,
            is_long_term: is_long_term(lot.purchase_date, sale_date),
        });
        remaining -= take;
    }

    if !remaining.is_zero() {
        return Err(Error::Internal(format!(
            "allocation of {} {} left {} unmatched",
            quantity, symbol, remaining
        )));
    }

    Ok(allocations)
}

fn select_lots<'a>(
    lots: &'a [TaxLot],
    selection: &[Uuid],
    quantity: Decimal,
) -> Result<Vec<&'a TaxLot>> {
    let mut seen = HashSet::new();
    let mut chosen = Vec::with_capacity(selection.len());

    for id in selection {
        if !seen.insert(*id) {
            return Err(Error::SpecificLotUnknown(format!("lot {} selected twice", id)));
        }
        let lot = lots
            .iter()
            .find(|l| l.id == *id)
            .ok_or_else(|| Error::SpecificLotUnknown(format!("lot {} is not open", id)))?;
        chosen.push(lot);
    }

    let selected: Decimal = chosen.iter().map(|l| l.quantity).sum();
    if selected < quantity {
        return Err(Error::SpecificLotUnknown(format!(
            "selected lots hold {} shares, sale needs {}",
            selected, quantity
        )));
    }

    Ok(chosen)
}
