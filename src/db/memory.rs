//! In-memory entity store
//!
//! Each write works on a clone of the state that replaces the original only
//! when the closure succeeds. Constraint checks mirror `schema.sql`.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::models::{
    CorporateAction, Holding, PerformanceSnapshot, Portfolio, PortfolioAction,
    PortfolioActionStatus, RealizedGain, TaxLot, Transaction,
};
use super::store::{Store, StoreTx};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
struct MemState {
    portfolios: BTreeMap<Uuid, Portfolio>,
    transactions: Vec<Transaction>,
    next_seq: i64,
    holdings: BTreeMap<(Uuid, String), Holding>,
    lots: Vec<TaxLot>,
    gains: Vec<RealizedGain>,
    corporate_actions: Vec<CorporateAction>,
    portfolio_actions: Vec<PortfolioAction>,
    snapshots: BTreeMap<(Uuid, NaiveDate), PerformanceSnapshot>,
}

/// Entity store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let state = self.lock()?;
        f(&*state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let mut working = state.clone();
        let value = f(&mut working)?;
        *state = working;
        Ok(value)
    }
}

fn sorted(mut txs: Vec<Transaction>) -> Vec<Transaction> {
    txs.sort_by_key(|t| t.replay_key());
    txs
}

fn require_non_negative(what: &str, value: rust_decimal::Decimal) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(Error::Conflict(format!("CHECK constraint failed: {} >= 0", what)));
    }
    Ok(())
}

impl MemState {
    fn require_portfolio(&self, id: Uuid) -> Result<()> {
        if !self.portfolios.contains_key(&id) {
            return Err(Error::Conflict("FOREIGN KEY constraint failed".to_string()));
        }
        Ok(())
    }
}

impl StoreTx for MemState {
    fn insert_portfolio(&mut self, portfolio: &Portfolio) -> Result<()> {
        if self
            .portfolios
            .values()
            .any(|p| p.owner_id == portfolio.owner_id && p.name == portfolio.name)
        {
            return Err(Error::Conflict(
                "UNIQUE constraint failed: portfolios.owner_id, portfolios.name".to_string(),
            ));
        }
        self.portfolios.insert(portfolio.id, portfolio.clone());
        Ok(())
    }

    fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.get(&id).cloned())
    }

    fn find_portfolio_by_name(&self, owner_id: Uuid, name: &str) -> Result<Option<Portfolio>> {
        Ok(self
            .portfolios
            .values()
            .find(|p| p.owner_id == owner_id && p.name == name)
            .cloned())
    }

    fn list_portfolios(&self, owner_id: Uuid) -> Result<Vec<Portfolio>> {
        let mut portfolios: Vec<Portfolio> = self
            .portfolios
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        portfolios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(portfolios)
    }

    fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<()> {
        if self.portfolios.values().any(|p| {
            p.id != portfolio.id && p.owner_id == portfolio.owner_id && p.name == portfolio.name
        }) {
            return Err(Error::Conflict(
                "UNIQUE constraint failed: portfolios.owner_id, portfolios.name".to_string(),
            ));
        }
        let existing = self
            .portfolios
            .get_mut(&portfolio.id)
            .ok_or_else(|| Error::not_found(format!("portfolio {}", portfolio.id)))?;
        existing.name = portfolio.name.clone();
        existing.description = portfolio.description.clone();
        existing.cost_basis_policy = portfolio.cost_basis_policy;
        existing.updated_at = portfolio.updated_at;
        Ok(())
    }

    fn delete_portfolio(&mut self, id: Uuid) -> Result<()> {
        if self.portfolios.remove(&id).is_none() {
            return Err(Error::not_found(format!("portfolio {}", id)));
        }
        self.transactions.retain(|t| t.portfolio_id != id);
        self.holdings.retain(|(pid, _), _| *pid != id);
        self.lots.retain(|l| l.portfolio_id != id);
        self.gains.retain(|g| g.portfolio_id != id);
        self.portfolio_actions.retain(|a| a.portfolio_id != id);
        self.snapshots.retain(|(pid, _), _| *pid != id);
        Ok(())
    }

    fn portfolios_holding_symbol(&self, symbol: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .holdings
            .values()
            .filter(|h| h.symbol == symbol)
            .map(|h| h.portfolio_id)
            .collect())
    }

    fn insert_transaction(&mut self, tx: &mut Transaction) -> Result<()> {
        self.require_portfolio(tx.portfolio_id)?;
        require_non_negative("transactions.quantity", tx.quantity)?;
        require_non_negative("transactions.commission", tx.commission)?;
        if self.transactions.iter().any(|t| t.id == tx.id) {
            return Err(Error::Conflict(
                "UNIQUE constraint failed: transactions.id".to_string(),
            ));
        }
        self.next_seq += 1;
        tx.seq = self.next_seq;
        self.transactions.push(tx.clone());
        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.transactions.iter().find(|t| t.id == id).cloned())
    }

    fn list_transactions(&self, portfolio_id: Uuid) -> Result<Vec<Transaction>> {
        Ok(sorted(
            self.transactions
                .iter()
                .filter(|t| t.portfolio_id == portfolio_id)
                .cloned()
                .collect(),
        ))
    }

    fn find_transactions_by_symbol(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
    ) -> Result<Vec<Transaction>> {
        Ok(sorted(
            self.transactions
                .iter()
                .filter(|t| t.portfolio_id == portfolio_id && t.symbol == symbol)
                .cloned()
                .collect(),
        ))
    }

    fn find_transactions_in_range(
        &self,
        portfolio_id: Uuid,
        symbol: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        Ok(sorted(
            self.transactions
                .iter()
                .filter(|t| {
                    t.portfolio_id == portfolio_id
                        && symbol.map_or(true, |s| t.symbol == s)
                        && t.trade_date >= from
                        && t.trade_date <= to
                })
                .cloned()
                .collect(),
        ))
    }

    fn find_transactions_by_batch(
        &self,
        portfolio_id: Uuid,
        batch: Uuid,
    ) -> Result<Vec<Transaction>> {
        Ok(sorted(
            self.transactions
                .iter()
                .filter(|t| t.portfolio_id == portfolio_id && t.import_batch == Some(batch))
                .cloned()
                .collect(),
        ))
    }

    fn fingerprint_exists(&self, portfolio_id: Uuid, fingerprint: &str) -> Result<bool> {
        Ok(self.transactions.iter().any(|t| {
            t.portfolio_id == portfolio_id && t.fingerprint.as_deref() == Some(fingerprint)
        }))
    }

    fn update_transaction(&mut self, tx: &Transaction) -> Result<()> {
        require_non_negative("transactions.quantity", tx.quantity)?;
        require_non_negative("transactions.commission", tx.commission)?;
        let existing = self
            .transactions
            .iter_mut()
            .find(|t| t.id == tx.id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", tx.id)))?;
        let seq = existing.seq;
        let created_at = existing.created_at;
        let import_batch = existing.import_batch;
        let fingerprint = existing.fingerprint.clone();
        *existing = tx.clone();
        existing.seq = seq;
        existing.created_at = created_at;
        existing.import_batch = import_batch;
        existing.fingerprint = fingerprint;
        Ok(())
    }

    fn delete_transaction(&mut self, id: Uuid) -> Result<()> {
        let before = self.transactions.len();
        self.transactions.retain(|t| t.id != id);
        if self.transactions.len() == before {
            return Err(Error::not_found(format!("transaction {}", id)));
        }
        Ok(())
    }

    fn rename_symbol(&mut self, portfolio_id: Uuid, old: &str, new: &str, keep: Uuid) -> Result<()> {
        for tx in self
            .transactions
            .iter_mut()
            .filter(|t| t.portfolio_id == portfolio_id && t.id != keep)
        {
            if tx.symbol == old {
                tx.symbol = new.to_string();
            }
            if tx.counterpart_symbol.as_deref() == Some(old) {
                tx.counterpart_symbol = Some(new.to_string());
            }
        }
        for gain in self
            .gains
            .iter_mut()
            .filter(|g| g.portfolio_id == portfolio_id && g.symbol == old)
        {
            gain.symbol = new.to_string();
        }
        Ok(())
    }

    fn get_holding(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Holding>> {
        Ok(self
            .holdings
            .get(&(portfolio_id, symbol.to_string()))
            .cloned())
    }

    fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>> {
        Ok(self
            .holdings
            .values()
            .filter(|h| h.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }

    fn put_holding(&mut self, holding: &Holding) -> Result<()> {
        self.require_portfolio(holding.portfolio_id)?;
        require_non_negative("holdings.quantity", holding.quantity)?;
        require_non_negative("holdings.cost_basis", holding.cost_basis)?;
        self.holdings.insert(
            (holding.portfolio_id, holding.symbol.clone()),
            holding.clone(),
        );
        Ok(())
    }

    fn delete_holding(&mut self, portfolio_id: Uuid, symbol: &str) -> Result<()> {
        self.holdings.remove(&(portfolio_id, symbol.to_string()));
        Ok(())
    }

    fn list_lots(&self, portfolio_id: Uuid, symbol: &str) -> Result<Vec<TaxLot>> {
        let mut lots: Vec<TaxLot> = self
            .lots
            .iter()
            .filter(|l| l.portfolio_id == portfolio_id && l.symbol == symbol)
            .cloned()
            .collect();
        lots.sort_by_key(|l| (l.purchase_date, l.acquired_seq, l.id));
        Ok(lots)
    }

    fn list_all_lots(&self, portfolio_id: Uuid) -> Result<Vec<TaxLot>> {
        let mut lots: Vec<TaxLot> = self
            .lots
            .iter()
            .filter(|l| l.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| {
            (&a.symbol, a.purchase_date, a.acquired_seq, a.id)
                .cmp(&(&b.symbol, b.purchase_date, b.acquired_seq, b.id))
        });
        Ok(lots)
    }

    fn replace_lots(&mut self, portfolio_id: Uuid, symbol: &str, lots: &[TaxLot]) -> Result<()> {
        self.require_portfolio(portfolio_id)?;
        for lot in lots {
            if lot.quantity <= rust_decimal::Decimal::ZERO {
                return Err(Error::Conflict(
                    "CHECK constraint failed: tax_lots.quantity > 0".to_string(),
                ));
            }
            require_non_negative("tax_lots.cost_basis", lot.cost_basis)?;
        }
        self.lots
            .retain(|l| !(l.portfolio_id == portfolio_id && l.symbol == symbol));
        self.lots.extend(lots.iter().cloned());
        Ok(())
    }

    fn insert_realized_gain(&mut self, gain: &RealizedGain) -> Result<()> {
        self.require_portfolio(gain.portfolio_id)?;
        if self.gains.iter().any(|g| g.id == gain.id) {
            return Err(Error::Conflict(
                "UNIQUE constraint failed: realized_gains.id".to_string(),
            ));
        }
        self.gains.push(gain.clone());
        Ok(())
    }

    fn list_realized_gains(
        &self,
        portfolio_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RealizedGain>> {
        let mut gains: Vec<RealizedGain> = self
            .gains
            .iter()
            .filter(|g| {
                g.portfolio_id == portfolio_id
                    && from.map_or(true, |d| g.sale_date >= d)
                    && to.map_or(true, |d| g.sale_date <= d)
            })
            .cloned()
            .collect();
        gains.sort_by_key(|g| (g.sale_date, g.purchase_date, g.id));
        Ok(gains)
    }

    fn delete_realized_gains(&mut self, sell_tx_ids: &[Uuid]) -> Result<()> {
        self.gains.retain(|g| !sell_tx_ids.contains(&g.sell_tx_id));
        Ok(())
    }

    fn insert_corporate_action(&mut self, action: &CorporateAction) -> Result<()> {
        self.corporate_actions.push(action.clone());
        Ok(())
    }

    fn get_corporate_action(&self, id: Uuid) -> Result<Option<CorporateAction>> {
        Ok(self.corporate_actions.iter().find(|a| a.id == id).cloned())
    }

    fn find_unapplied_corporate_actions(&self) -> Result<Vec<CorporateAction>> {
        let mut actions: Vec<CorporateAction> = self
            .corporate_actions
            .iter()
            .filter(|a| !a.applied)
            .cloned()
            .collect();
        actions.sort_by_key(|a| (a.effective_date, a.created_at));
        Ok(actions)
    }

    fn mark_corporate_action_applied(&mut self, id: Uuid) -> Result<()> {
        let action = self
            .corporate_actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::not_found(format!("corporate action {}", id)))?;
        action.applied = true;
        Ok(())
    }

    fn insert_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()> {
        self.require_portfolio(action.portfolio_id)?;
        if self.portfolio_actions.iter().any(|a| {
            a.portfolio_id == action.portfolio_id
                && a.corporate_action_id == action.corporate_action_id
        }) {
            return Err(Error::Conflict(
                "UNIQUE constraint failed: portfolio_actions.portfolio_id, portfolio_actions.corporate_action_id"
                    .to_string(),
            ));
        }
        self.portfolio_actions.push(action.clone());
        Ok(())
    }

    fn list_portfolio_actions(
        &self,
        portfolio_id: Uuid,
        status: Option<PortfolioActionStatus>,
    ) -> Result<Vec<PortfolioAction>> {
        let effective = |action: &PortfolioAction| {
            self.corporate_actions
                .iter()
                .find(|c| c.id == action.corporate_action_id)
                .map(|c| c.effective_date)
        };
        let mut actions: Vec<PortfolioAction> = self
            .portfolio_actions
            .iter()
            .filter(|a| a.portfolio_id == portfolio_id && status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        actions.sort_by_key(|a| (effective(a), a.created_at));
        Ok(actions)
    }

    fn update_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()> {
        let existing = self
            .portfolio_actions
            .iter_mut()
            .find(|a| a.id == action.id)
            .ok_or_else(|| Error::not_found(format!("portfolio action {}", action.id)))?;
        existing.status = action.status;
        existing.message = action.message.clone();
        existing.transaction_id = action.transaction_id;
        existing.updated_at = action.updated_at;
        Ok(())
    }

    fn upsert_snapshot(&mut self, snapshot: &PerformanceSnapshot) -> Result<()> {
        self.require_portfolio(snapshot.portfolio_id)?;
        let key = (snapshot.portfolio_id, snapshot.date);
        let mut stored = snapshot.clone();
        if let Some(existing) = self.snapshots.get(&key) {
            stored.id = existing.id;
        }
        self.snapshots.insert(key, stored);
        Ok(())
    }

    fn get_snapshot(
        &self,
        portfolio_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PerformanceSnapshot>> {
        Ok(self.snapshots.get(&(portfolio_id, date)).cloned())
    }

    fn find_latest_snapshot(&self, portfolio_id: Uuid) -> Result<Option<PerformanceSnapshot>> {
        Ok(self
            .snapshots
            .range((portfolio_id, NaiveDate::MIN)..=(portfolio_id, NaiveDate::MAX))
            .next_back()
            .map(|(_, s)| s.clone()))
    }

    fn find_snapshots_in_range(
        &self,
        portfolio_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PerformanceSnapshot>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .snapshots
            .range((portfolio_id, from)..=(portfolio_id, to))
            .map(|(_, s)| s.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CostBasisPolicy;
    use crate::money::Currency;
    use chrono::Utc;

    fn portfolio(owner: Uuid, name: &str) -> Portfolio {
        Portfolio {
            id: Uuid::new_v4(),
            owner_id: owner,
            name: name.to_string(),
            description: None,
            base_currency: Currency::USD,
            cost_basis_policy: CostBasisPolicy::Fifo,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let p = portfolio(owner, "Main");

        let result: Result<()> = store.write(|tx| {
            tx.insert_portfolio(&p)?;
            Err(Error::validation("abort"))
        });
        assert!(result.is_err());

        let found = store.read(|tx| tx.get_portfolio(p.id)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_duplicate_portfolio_name_is_conflict() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store
            .write(|tx| tx.insert_portfolio(&portfolio(owner, "Main")))
            .unwrap();
        let err = store
            .write(|tx| tx.insert_portfolio(&portfolio(owner, "Main")))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Same name for another owner is fine
        store
            .write(|tx| tx.insert_portfolio(&portfolio(Uuid::new_v4(), "Main")))
            .unwrap();
    }
}
