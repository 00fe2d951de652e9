//! Storage capability used by the engine
//!
//! A [`Store`] hands out units of work. Everything done through the
//! [`StoreTx`] passed to a `write` closure commits together or not at all;
//! `read` closures observe one consistent view.

use chrono::NaiveDate;
use uuid::Uuid;

use super::models::{
    CorporateAction, Holding, PerformanceSnapshot, Portfolio, PortfolioAction,
    PortfolioActionStatus, RealizedGain, TaxLot, Transaction,
};
use crate::error::{Error, Result};

/// Source of units of work over the entity store
pub trait Store: Send + Sync {
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T>;

    fn write<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T>;
}

/// Per-entity operations available inside a unit of work
///
/// Lookups return `Ok(None)` for missing rows; owner checks are layered on
/// top by [`authorize`].
pub trait StoreTx {
    // Portfolios
    fn insert_portfolio(&mut self, portfolio: &Portfolio) -> Result<()>;
    fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>>;
    fn find_portfolio_by_name(&self, owner_id: Uuid, name: &str) -> Result<Option<Portfolio>>;
    fn list_portfolios(&self, owner_id: Uuid) -> Result<Vec<Portfolio>>;
    fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<()>;
    fn delete_portfolio(&mut self, id: Uuid) -> Result<()>;
    /// Portfolios (any owner) with a non-zero holding of `symbol`.
    fn portfolios_holding_symbol(&self, symbol: &str) -> Result<Vec<Uuid>>;

    // Transactions, always returned in (trade_date, seq) order
    /// Stores the transaction and assigns its `seq`.
    fn insert_transaction(&mut self, tx: &mut Transaction) -> Result<()>;
    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    fn list_transactions(&self, portfolio_id: Uuid) -> Result<Vec<Transaction>>;
    fn find_transactions_by_symbol(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
    ) -> Result<Vec<Transaction>>;
    /// Inclusive date range, optionally restricted to one symbol.
    fn find_transactions_in_range(
        &self,
        portfolio_id: Uuid,
        symbol: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>>;
    fn find_transactions_by_batch(&self, portfolio_id: Uuid, batch: Uuid)
        -> Result<Vec<Transaction>>;
    fn fingerprint_exists(&self, portfolio_id: Uuid, fingerprint: &str) -> Result<bool>;
    /// Replaces the payload of an existing transaction, keeping its `seq`.
    fn update_transaction(&mut self, tx: &Transaction) -> Result<()>;
    fn delete_transaction(&mut self, id: Uuid) -> Result<()>;
    /// Rewrites `old` to `new` on every transaction (symbol and counterpart) and
    /// realized gain of the portfolio, except transaction `keep`.
    fn rename_symbol(&mut self, portfolio_id: Uuid, old: &str, new: &str, keep: Uuid)
        -> Result<()>;

    // Holdings
    fn get_holding(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Holding>>;
    fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>>;
    fn put_holding(&mut self, holding: &Holding) -> Result<()>;
    fn delete_holding(&mut self, portfolio_id: Uuid, symbol: &str) -> Result<()>;

    // Tax lots
    fn list_lots(&self, portfolio_id: Uuid, symbol: &str) -> Result<Vec<TaxLot>>;
    fn list_all_lots(&self, portfolio_id: Uuid) -> Result<Vec<TaxLot>>;
    /// Replaces every lot of (portfolio, symbol) with `lots`.
    fn replace_lots(&mut self, portfolio_id: Uuid, symbol: &str, lots: &[TaxLot]) -> Result<()>;

    // Realized gains
    fn insert_realized_gain(&mut self, gain: &RealizedGain) -> Result<()>;
    fn list_realized_gains(
        &self,
        portfolio_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RealizedGain>>;
    fn delete_realized_gains(&mut self, sell_tx_ids: &[Uuid]) -> Result<()>;

    // Corporate actions
    fn insert_corporate_action(&mut self, action: &CorporateAction) -> Result<()>;
    fn get_corporate_action(&self, id: Uuid) -> Result<Option<CorporateAction>>;
    fn find_unapplied_corporate_actions(&self) -> Result<Vec<CorporateAction>>;
    fn mark_corporate_action_applied(&mut self, id: Uuid) -> Result<()>;

    // Portfolio actions
    fn insert_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()>;
    fn list_portfolio_actions(
        &self,
        portfolio_id: Uuid,
        status: Option<PortfolioActionStatus>,
    ) -> Result<Vec<PortfolioAction>>;
    fn update_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()>;

    // Snapshots
    /// Inserts or replaces the snapshot for (portfolio, date).
    fn upsert_snapshot(&mut self, snapshot: &PerformanceSnapshot) -> Result<()>;
    fn get_snapshot(&self, portfolio_id: Uuid, date: NaiveDate)
        -> Result<Option<PerformanceSnapshot>>;
    fn find_latest_snapshot(&self, portfolio_id: Uuid) -> Result<Option<PerformanceSnapshot>>;
    /// Inclusive range, ascending by date.
    fn find_snapshots_in_range(
        &self,
        portfolio_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PerformanceSnapshot>>;
}

/// Load a portfolio on behalf of `owner_id`.
///
/// Missing portfolios are `NotFound`; portfolios owned by someone else are
/// `Unauthorized`.
pub fn authorize(tx: &dyn StoreTx, owner_id: Uuid, portfolio_id: Uuid) -> Result<Portfolio> {
    let portfolio = tx
        .get_portfolio(portfolio_id)?
        .ok_or_else(|| Error::not_found(format!("portfolio {}", portfolio_id)))?;
    if portfolio.owner_id != owner_id {
        return Err(Error::Unauthorized(portfolio_id.to_string()));
    }
    Ok(portfolio)
}
