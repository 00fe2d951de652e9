//! In-memory lot book
//!
//! `PositionBook` holds the open tax lots of one portfolio, keyed by symbol,
//! and applies transactions to them. Holdings are always derived from the
//! lots, so quantity and cost basis of a holding equal the sums over its lots.
//! Incremental application, full replay and the tax report all go through
//! [`PositionBook::apply`].

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

use crate::db::{CostBasisPolicy, Holding, Portfolio, RealizedGain, TaxLot, Transaction, TransactionKind};
use crate::error::{Error, Result};
use crate::money::{div_round, round_money};
use crate::tax::cost_basis::allocate;

/// Namespace suffix for lots created directly by a purchase
const LOT_NAME: &[u8] = b"lot";

/// Deterministic id of the lot opened by purchase `tx_id`.
pub fn purchase_lot_id(tx_id: Uuid) -> Uuid {
    Uuid::new_v5(&tx_id, LOT_NAME)
}

/// Deterministic id of the lot derived from `parent` by corporate action `tx_id`.
pub fn derived_lot_id(parent: Uuid, tx_id: Uuid) -> Uuid {
    Uuid::new_v5(&parent, tx_id.as_bytes())
}

#[derive(Debug, Clone)]
pub struct PositionBook {
    portfolio_id: Uuid,
    policy: CostBasisPolicy,
    lots: BTreeMap<String, Vec<TaxLot>>,
    gains: Vec<RealizedGain>,
    touched: BTreeSet<String>,
}

impl PositionBook {
    pub fn new(portfolio: &Portfolio) -> Self {
        Self {
            portfolio_id: portfolio.id,
            policy: portfolio.cost_basis_policy,
            lots: BTreeMap::new(),
            gains: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Start from lots already on record.
    pub fn with_lots(portfolio: &Portfolio, lots: impl IntoIterator<Item = TaxLot>) -> Self {
        let mut book = Self::new(portfolio);
        for lot in lots {
            book.lots.entry(lot.symbol.clone()).or_default().push(lot);
        }
        book
    }

    pub fn lots(&self, symbol: &str) -> &[TaxLot] {
        self.lots.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.lots(symbol).iter().map(|l| l.quantity).sum()
    }

    /// Holding derived from the open lots of `symbol`, `None` when flat.
    pub fn holding(&self, symbol: &str) -> Result<Option<Holding>> {
        let lots = self.lots(symbol);
        let quantity: Decimal = lots.iter().map(|l| l.quantity).sum();
        if quantity.is_zero() {
            return Ok(None);
        }
        let cost_basis: Decimal = lots.iter().map(|l| l.cost_basis).sum();
        Ok(Some(Holding {
            portfolio_id: self.portfolio_id,
            symbol: symbol.to_string(),
            quantity,
            cost_basis,
            avg_cost: div_round(cost_basis, quantity)?,
        }))
    }

    /// Every open position, ordered by symbol.
    pub fn holdings(&self) -> Result<Vec<Holding>> {
        let mut holdings = Vec::new();
        for symbol in self.lots.keys() {
            if let Some(holding) = self.holding(symbol)? {
                holdings.push(holding);
            }
        }
        Ok(holdings)
    }

    /// Symbols changed since the book was created.
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn gains(&self) -> &[RealizedGain] {
        &self.gains
    }

    pub fn take_gains(&mut self) -> Vec<RealizedGain> {
        std::mem::take(&mut self.gains)
    }

    /// Apply one transaction.
    ///
    /// Returns the share count recorded on corporate-action audit entries, or
    /// `None` for trades and dividends.
    pub fn apply(&mut self, tx: &Transaction) -> Result<Option<Decimal>> {
        // Renamed history leaves the old symbol empty on replay
        if tx.kind.is_corporate_action()
            && tx.kind != TransactionKind::TickerChange
            && self.quantity(&tx.symbol).is_zero()
        {
            return Err(Error::not_found(format!(
                "holding of {} on {} required for {}",
                tx.symbol,
                tx.trade_date,
                tx.kind.as_str()
            )));
        }
        match tx.kind {
            TransactionKind::Buy | TransactionKind::DividendReinvest => {
                self.buy(tx)?;
                Ok(None)
            }
            TransactionKind::Sell => {
                self.sell(tx)?;
                Ok(None)
            }
            TransactionKind::Dividend => Ok(None),
            TransactionKind::Split => self.split(tx).map(Some),
            TransactionKind::Merger => self.transfer(tx, required(tx.ratio, tx, "ratio")?, true).map(Some),
            TransactionKind::TickerChange => self.transfer(tx, Decimal::ONE, false).map(Some),
            TransactionKind::Spinoff => self.spinoff(tx).map(Some),
        }
    }

    fn lots_mut(&mut self, symbol: &str) -> &mut Vec<TaxLot> {
        self.touched.insert(symbol.to_string());
        self.lots.entry(symbol.to_string()).or_default()
    }

    fn buy(&mut self, tx: &Transaction) -> Result<()> {
        let lot = TaxLot {
            id: purchase_lot_id(tx.id),
            portfolio_id: self.portfolio_id,
            symbol: tx.symbol.clone(),
            purchase_date: tx.trade_date,
            quantity: tx.quantity,
            cost_basis: round_money(tx.total_cost_base()),
            source_tx_id: tx.id,
            acquired_seq: tx.seq,
        };
        debug!(
            "Opening lot {} of {} {} at cost {}",
            lot.id, lot.quantity, lot.symbol, lot.cost_basis
        );
        self.lots_mut(&tx.symbol).push(lot);
        Ok(())
    }

    fn sell(&mut self, tx: &Transaction) -> Result<()> {
        let price = required(tx.price, tx, "price")?;
        let allocations = allocate(
            &tx.symbol,
            self.lots(&tx.symbol),
            tx.quantity,
            self.policy,
            &tx.lot_selection,
            tx.trade_date,
        )?;

        // Commission reduces proceeds pro rata by quantity; the last entry takes the remainder.
        let commission = tx.commission * tx.fx_rate;
        let mut commission_left = commission;
        let last = allocations.len().saturating_sub(1);

        let portfolio_id = self.portfolio_id;
        let lots = self.lots_mut(&tx.symbol);
        let mut gains = Vec::with_capacity(allocations.len());

        for (i, alloc) in allocations.iter().enumerate() {
            let share = if i == last {
                commission_left
            } else {
                round_money(div_round(commission * alloc.quantity, tx.quantity)?)
            };
            commission_left -= share;

            let proceeds = round_money(alloc.quantity * price * tx.fx_rate) - share;

            let idx = lots
                .iter()
                .position(|l| l.id == alloc.lot_id)
                .ok_or_else(|| Error::Internal(format!("allocated lot {} vanished", alloc.lot_id)))?;
            let lot = &mut lots[idx];
            lot.quantity -= alloc.quantity;
            lot.cost_basis -= alloc.cost_basis;
            if lot.quantity.is_zero() {
                lots.remove(idx);
            }

            gains.push(RealizedGain {
                id: Uuid::new_v5(&tx.id, alloc.lot_id.as_bytes()),
                portfolio_id,
                sell_tx_id: tx.id,
                lot_id: alloc.lot_id,
                symbol: tx.symbol.clone(),
                sale_date: tx.trade_date,
                purchase_date: alloc.purchase_date,
                quantity: alloc.quantity,
                cost_basis: alloc.cost_basis,
                proceeds,
                gain: proceeds - alloc.cost_basis,
                is_long_term: alloc.is_long_term,
            });
        }

        self.gains.extend(gains);
        Ok(())
    }

    fn split(&mut self, tx: &Transaction) -> Result<Decimal> {
        let ratio = required(tx.ratio, tx, "ratio")?;
        let before = self.quantity(&tx.symbol);
        for lot in self.lots_mut(&tx.symbol).iter_mut() {
            lot.quantity *= ratio;
        }
        let after = self.quantity(&tx.symbol);
        Ok((after - before).abs())
    }

    /// Move every lot of `tx.symbol` to the counterpart symbol, scaling
    /// quantities by `ratio` and keeping cost basis and purchase dates.
    fn transfer(&mut self, tx: &Transaction, ratio: Decimal, derive_ids: bool) -> Result<Decimal> {
        let target = required(tx.counterpart_symbol.clone(), tx, "counterpart symbol")?;
        let moved = std::mem::take(self.lots_mut(&tx.symbol));
        let quantity: Decimal = moved.iter().map(|l| l.quantity).sum();

        let destination = self.lots_mut(&target);
        for lot in moved {
            destination.push(TaxLot {
                id: if derive_ids {
                    derived_lot_id(lot.id, tx.id)
                } else {
                    lot.id
                },
                symbol: target.clone(),
                quantity: lot.quantity * ratio,
                source_tx_id: if derive_ids { tx.id } else { lot.source_tx_id },
                ..lot
            });
        }
        Ok(quantity)
    }

    fn spinoff(&mut self, tx: &Transaction) -> Result<Decimal> {
        let ratio = required(tx.ratio, tx, "ratio")?;
        let allocation = required(tx.allocation, tx, "allocation")?;
        let child = required(tx.counterpart_symbol.clone(), tx, "counterpart symbol")?;

        let mut children = Vec::new();
        for lot in self.lots_mut(&tx.symbol).iter_mut() {
            let moved_cost = round_money(lot.cost_basis * allocation);
            lot.cost_basis -= moved_cost;
            children.push(TaxLot {
                id: derived_lot_id(lot.id, tx.id),
                portfolio_id: lot.portfolio_id,
                symbol: child.clone(),
                purchase_date: lot.purchase_date,
                quantity: lot.quantity * ratio,
                cost_basis: moved_cost,
                source_tx_id: tx.id,
                acquired_seq: lot.acquired_seq,
            });
        }

        let child_quantity: Decimal = children.iter().map(|l| l.quantity).sum();
        self.lots_mut(&child).extend(children);
        Ok(child_quantity)
    }
}

fn required<T>(value: Option<T>, tx: &Transaction, field: &str) -> Result<T> {
    value.ok_or_else(|| {
        Error::Internal(format!(
            "{} transaction {} has no {}",
            tx.kind.as_str(),
            tx.id,
            field
        ))
    })
}
