//! SQLite-backed entity store
//!
//! Writers take `BEGIN IMMEDIATE`, so mutations are serialised database-wide
//! and a sale can never observe a half-applied purchase of the same holding.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::models::{
    CorporateAction, Holding, PerformanceSnapshot, Portfolio, PortfolioAction,
    PortfolioActionStatus, RealizedGain, TaxLot, Transaction,
};
use super::store::{Store, StoreTx};
use super::{
    decimal_text, get_decimal_value, get_optional_decimal_value, get_optional_uuid, get_parsed,
    get_uuid, init_database, open_db, optional_decimal_text,
};
use crate::error::{Error, Result};

/// Entity store over a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_db(path)?;
        init_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("database connection lock poisoned".to_string()))
    }
}

impl Store for SqliteStore {
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let unit = SqliteTx { conn: &*tx };
        let result = f(&unit);
        tx.rollback()?;
        result
    }

    fn write<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut unit = SqliteTx { conn: &*tx };
        match f(&mut unit) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    return Err(Error::compensation_failed(&err, &rollback_err.into()));
                }
                Err(err)
            }
        }
    }
}

/// Unit of work bound to an open SQLite transaction
struct SqliteTx<'a> {
    conn: &'a Connection,
}

const PORTFOLIO_COLUMNS: &str =
    "id, owner_id, name, description, base_currency, cost_basis_policy, created_at, updated_at";

fn map_portfolio(row: &rusqlite::Row) -> rusqlite::Result<Portfolio> {
    Ok(Portfolio {
        id: get_uuid(row, 0)?,
        owner_id: get_uuid(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        base_currency: get_parsed(row, 4)?,
        cost_basis_policy: get_parsed(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const TX_COLUMNS: &str = "id, portfolio_id, kind, symbol, trade_date, quantity, price, commission,
    currency, fx_rate, cash_amount, ratio, counterpart_symbol, allocation, lot_selection, note,
    import_batch, fingerprint, seq, created_at";

fn map_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let lot_selection: String = row.get(14)?;
    let lot_selection: Vec<Uuid> = serde_json::from_str(&lot_selection).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Transaction {
        id: get_uuid(row, 0)?,
        portfolio_id: get_uuid(row, 1)?,
        kind: get_parsed(row, 2)?,
        symbol: row.get(3)?,
        trade_date: row.get(4)?,
        quantity: get_decimal_value(row, 5)?,
        price: get_optional_decimal_value(row, 6)?,
        commission: get_decimal_value(row, 7)?,
        currency: get_parsed(row, 8)?,
        fx_rate: get_decimal_value(row, 9)?,
        cash_amount: get_optional_decimal_value(row, 10)?,
        ratio: get_optional_decimal_value(row, 11)?,
        counterpart_symbol: row.get(12)?,
        allocation: get_optional_decimal_value(row, 13)?,
        lot_selection,
        note: row.get(15)?,
        import_batch: get_optional_uuid(row, 16)?,
        fingerprint: row.get(17)?,
        seq: row.get(18)?,
        created_at: row.get(19)?,
    })
}

fn map_holding(row: &rusqlite::Row) -> rusqlite::Result<Holding> {
    Ok(Holding {
        portfolio_id: get_uuid(row, 0)?,
        symbol: row.get(1)?,
        quantity: get_decimal_value(row, 2)?,
        cost_basis: get_decimal_value(row, 3)?,
        avg_cost: get_decimal_value(row, 4)?,
    })
}

const LOT_COLUMNS: &str =
    "id, portfolio_id, symbol, purchase_date, quantity, cost_basis, source_tx_id, acquired_seq";

fn map_lot(row: &rusqlite::Row) -> rusqlite::Result<TaxLot> {
    Ok(TaxLot {
        id: get_uuid(row, 0)?,
        portfolio_id: get_uuid(row, 1)?,
        symbol: row.get(2)?,
        purchase_date: row.get(3)?,
        quantity: get_decimal_value(row, 4)?,
        cost_basis: get_decimal_value(row, 5)?,
        source_tx_id: get_uuid(row, 6)?,
        acquired_seq: row.get(7)?,
    })
}

const GAIN_COLUMNS: &str = "id, portfolio_id, sell_tx_id, lot_id, symbol, sale_date, purchase_date,
    quantity, cost_basis, proceeds, gain, is_long_term";

fn map_gain(row: &rusqlite::Row) -> rusqlite::Result<RealizedGain> {
    Ok(RealizedGain {
        id: get_uuid(row, 0)?,
        portfolio_id: get_uuid(row, 1)?,
        sell_tx_id: get_uuid(row, 2)?,
        lot_id: get_uuid(row, 3)?,
        symbol: row.get(4)?,
        sale_date: row.get(5)?,
        purchase_date: row.get(6)?,
        quantity: get_decimal_value(row, 7)?,
        cost_basis: get_decimal_value(row, 8)?,
        proceeds: get_decimal_value(row, 9)?,
        gain: get_decimal_value(row, 10)?,
        is_long_term: row.get(11)?,
    })
}

const ACTION_COLUMNS: &str = "id, symbol, kind, effective_date, ratio, amount_per_share, new_symbol,
    allocation, applied, created_at";

fn map_corporate_action(row: &rusqlite::Row) -> rusqlite::Result<CorporateAction> {
    Ok(CorporateAction {
        id: get_uuid(row, 0)?,
        symbol: row.get(1)?,
        kind: get_parsed(row, 2)?,
        effective_date: row.get(3)?,
        ratio: get_optional_decimal_value(row, 4)?,
        amount_per_share: get_optional_decimal_value(row, 5)?,
        new_symbol: row.get(6)?,
        allocation: get_optional_decimal_value(row, 7)?,
        applied: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const PORTFOLIO_ACTION_COLUMNS: &str = "pa.id, pa.portfolio_id, pa.corporate_action_id, pa.symbol,
    pa.status, pa.message, pa.transaction_id, pa.created_at, pa.updated_at";

fn map_portfolio_action(row: &rusqlite::Row) -> rusqlite::Result<PortfolioAction> {
    Ok(PortfolioAction {
        id: get_uuid(row, 0)?,
        portfolio_id: get_uuid(row, 1)?,
        corporate_action_id: get_uuid(row, 2)?,
        symbol: row.get(3)?,
        status: get_parsed(row, 4)?,
        message: row.get(5)?,
        transaction_id: get_optional_uuid(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const SNAPSHOT_COLUMNS: &str = "id, portfolio_id, snapshot_date, total_value, total_cost_basis,
    total_return, total_return_pct, day_change, day_change_pct, created_at";

fn map_snapshot(row: &rusqlite::Row) -> rusqlite::Result<PerformanceSnapshot> {
    Ok(PerformanceSnapshot {
        id: get_uuid(row, 0)?,
        portfolio_id: get_uuid(row, 1)?,
        date: row.get(2)?,
        total_value: get_decimal_value(row, 3)?,
        total_cost_basis: get_decimal_value(row, 4)?,
        total_return: get_decimal_value(row, 5)?,
        total_return_pct: get_decimal_value(row, 6)?,
        day_change: get_optional_decimal_value(row, 7)?,
        day_change_pct: get_optional_decimal_value(row, 8)?,
        created_at: row.get(9)?,
    })
}

impl SqliteTx<'_> {
    fn query_transactions(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY trade_date ASC, seq ASC",
            TX_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, map_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl StoreTx for SqliteTx<'_> {
    fn insert_portfolio(&mut self, portfolio: &Portfolio) -> Result<()> {
        self.conn.execute(
            "INSERT INTO portfolios (id, owner_id, name, description, base_currency,
                cost_basis_policy, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                portfolio.id.to_string(),
                portfolio.owner_id.to_string(),
                portfolio.name,
                portfolio.description,
                portfolio.base_currency.as_str(),
                portfolio.cost_basis_policy.as_str(),
                portfolio.created_at,
                portfolio.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        let sql = format!("SELECT {} FROM portfolios WHERE id = ?1", PORTFOLIO_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id.to_string()], map_portfolio)
            .optional()?)
    }

    fn find_portfolio_by_name(&self, owner_id: Uuid, name: &str) -> Result<Option<Portfolio>> {
        let sql = format!(
            "SELECT {} FROM portfolios WHERE owner_id = ?1 AND name = ?2",
            PORTFOLIO_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![owner_id.to_string(), name], map_portfolio)
            .optional()?)
    }

    fn list_portfolios(&self, owner_id: Uuid) -> Result<Vec<Portfolio>> {
        let sql = format!(
            "SELECT {} FROM portfolios WHERE owner_id = ?1 ORDER BY name",
            PORTFOLIO_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([owner_id.to_string()], map_portfolio)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_portfolio(&mut self, portfolio: &Portfolio) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE portfolios SET name = ?2, description = ?3, cost_basis_policy = ?4,
                updated_at = ?5
             WHERE id = ?1",
            params![
                portfolio.id.to_string(),
                portfolio.name,
                portfolio.description,
                portfolio.cost_basis_policy.as_str(),
                portfolio.updated_at,
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("portfolio {}", portfolio.id)));
        }
        Ok(())
    }

    fn delete_portfolio(&mut self, id: Uuid) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM portfolios WHERE id = ?1", [id.to_string()])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("portfolio {}", id)));
        }
        Ok(())
    }

    fn portfolios_holding_symbol(&self, symbol: &str) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(
            "SELECT portfolio_id FROM holdings WHERE symbol = ?1 ORDER BY portfolio_id",
        )?;
        let rows = stmt.query_map([symbol], |row| get_uuid(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_transaction(&mut self, tx: &mut Transaction) -> Result<()> {
        let lot_selection = serde_json::to_string(&tx.lot_selection)?;
        self.conn.execute(
            "INSERT INTO transactions (id, portfolio_id, kind, symbol, trade_date, quantity,
                price, commission, currency, fx_rate, cash_amount, ratio, counterpart_symbol,
                allocation, lot_selection, note, import_batch, fingerprint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19)",
            params![
                tx.id.to_string(),
                tx.portfolio_id.to_string(),
                tx.kind.as_str(),
                tx.symbol,
                tx.trade_date,
                decimal_text(tx.quantity),
                optional_decimal_text(tx.price),
                decimal_text(tx.commission),
                tx.currency.as_str(),
                decimal_text(tx.fx_rate),
                optional_decimal_text(tx.cash_amount),
                optional_decimal_text(tx.ratio),
                tx.counterpart_symbol,
                optional_decimal_text(tx.allocation),
                lot_selection,
                tx.note,
                tx.import_batch.map(|b| b.to_string()),
                tx.fingerprint,
                tx.created_at,
            ],
        )?;
        tx.seq = self.conn.last_insert_rowid();
        Ok(())
    }

    fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TX_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id.to_string()], map_transaction)
            .optional()?)
    }

    fn list_transactions(&self, portfolio_id: Uuid) -> Result<Vec<Transaction>> {
        self.query_transactions("portfolio_id = ?1", [portfolio_id.to_string()])
    }

    fn find_transactions_by_symbol(
        &self,
        portfolio_id: Uuid,
        symbol: &str,
    ) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "portfolio_id = ?1 AND symbol = ?2",
            params![portfolio_id.to_string(), symbol],
        )
    }

    fn find_transactions_in_range(
        &self,
        portfolio_id: Uuid,
        symbol: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        match symbol {
            Some(symbol) => self.query_transactions(
                "portfolio_id = ?1 AND symbol = ?2 AND trade_date >= ?3 AND trade_date <= ?4",
                params![portfolio_id.to_string(), symbol, from, to],
            ),
            None => self.query_transactions(
                "portfolio_id = ?1 AND trade_date >= ?2 AND trade_date <= ?3",
                params![portfolio_id.to_string(), from, to],
            ),
        }
    }

    fn find_transactions_by_batch(
        &self,
        portfolio_id: Uuid,
        batch: Uuid,
    ) -> Result<Vec<Transaction>> {
        self.query_transactions(
            "portfolio_id = ?1 AND import_batch = ?2",
            params![portfolio_id.to_string(), batch.to_string()],
        )
    }

    fn fingerprint_exists(&self, portfolio_id: Uuid, fingerprint: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE portfolio_id = ?1 AND fingerprint = ?2",
            params![portfolio_id.to_string(), fingerprint],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn update_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let lot_selection = serde_json::to_string(&tx.lot_selection)?;
        let updated = self.conn.execute(
            "UPDATE transactions SET kind = ?2, symbol = ?3, trade_date = ?4, quantity = ?5,
                price = ?6, commission = ?7, currency = ?8, fx_rate = ?9, cash_amount = ?10,
                ratio = ?11, counterpart_symbol = ?12, allocation = ?13, lot_selection = ?14,
                note = ?15
             WHERE id = ?1",
            params![
                tx.id.to_string(),
                tx.kind.as_str(),
                tx.symbol,
                tx.trade_date,
                decimal_text(tx.quantity),
                optional_decimal_text(tx.price),
                decimal_text(tx.commission),
                tx.currency.as_str(),
                decimal_text(tx.fx_rate),
                optional_decimal_text(tx.cash_amount),
                optional_decimal_text(tx.ratio),
                tx.counterpart_symbol,
                optional_decimal_text(tx.allocation),
                lot_selection,
                tx.note,
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    fn delete_transaction(&mut self, id: Uuid) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM transactions WHERE id = ?1", [id.to_string()])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("transaction {}", id)));
        }
        Ok(())
    }

    fn rename_symbol(&mut self, portfolio_id: Uuid, old: &str, new: &str, keep: Uuid) -> Result<()> {
        let pid = portfolio_id.to_string();
        let keep = keep.to_string();
        self.conn.execute(
            "UPDATE transactions SET symbol = ?3 WHERE portfolio_id = ?1 AND symbol = ?2 AND id != ?4",
            params![pid, old, new, keep],
        )?;
        self.conn.execute(
            "UPDATE transactions SET counterpart_symbol = ?3
             WHERE portfolio_id = ?1 AND counterpart_symbol = ?2 AND id != ?4",
            params![pid, old, new, keep],
        )?;
        self.conn.execute(
            "UPDATE realized_gains SET symbol = ?3 WHERE portfolio_id = ?1 AND symbol = ?2",
            params![pid, old, new],
        )?;
        Ok(())
    }

    fn get_holding(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Holding>> {
        Ok(self
            .conn
            .query_row(
                "SELECT portfolio_id, symbol, quantity, cost_basis, avg_cost
                 FROM holdings WHERE portfolio_id = ?1 AND symbol = ?2",
                params![portfolio_id.to_string(), symbol],
                map_holding,
            )
            .optional()?)
    }

    fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>> {
        let mut stmt = self.conn.prepare(
            "SELECT portfolio_id, symbol, quantity, cost_basis, avg_cost
             FROM holdings WHERE portfolio_id = ?1 ORDER BY symbol",
        )?;
        let rows = stmt.query_map([portfolio_id.to_string()], map_holding)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn put_holding(&mut self, holding: &Holding) -> Result<()> {
        self.conn.execute(
            "INSERT INTO holdings (portfolio_id, symbol, quantity, cost_basis, avg_cost)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(portfolio_id, symbol) DO UPDATE SET
                quantity = excluded.quantity,
                cost_basis = excluded.cost_basis,
                avg_cost = excluded.avg_cost",
            params![
                holding.portfolio_id.to_string(),
                holding.symbol,
                decimal_text(holding.quantity),
                decimal_text(holding.cost_basis),
                decimal_text(holding.avg_cost),
            ],
        )?;
        Ok(())
    }

    fn delete_holding(&mut self, portfolio_id: Uuid, symbol: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM holdings WHERE portfolio_id = ?1 AND symbol = ?2",
            params![portfolio_id.to_string(), symbol],
        )?;
        Ok(())
    }

    fn list_lots(&self, portfolio_id: Uuid, symbol: &str) -> Result<Vec<TaxLot>> {
        let sql = format!(
            "SELECT {} FROM tax_lots WHERE portfolio_id = ?1 AND symbol = ?2
             ORDER BY purchase_date ASC, acquired_seq ASC, id ASC",
            LOT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![portfolio_id.to_string(), symbol], map_lot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_all_lots(&self, portfolio_id: Uuid) -> Result<Vec<TaxLot>> {
        let sql = format!(
            "SELECT {} FROM tax_lots WHERE portfolio_id = ?1
             ORDER BY symbol ASC, purchase_date ASC, acquired_seq ASC, id ASC",
            LOT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([portfolio_id.to_string()], map_lot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_lots(&mut self, portfolio_id: Uuid, symbol: &str, lots: &[TaxLot]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM tax_lots WHERE portfolio_id = ?1 AND symbol = ?2",
            params![portfolio_id.to_string(), symbol],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO tax_lots (id, portfolio_id, symbol, purchase_date, quantity, cost_basis,
                source_tx_id, acquired_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for lot in lots {
            stmt.execute(params![
                lot.id.to_string(),
                lot.portfolio_id.to_string(),
                lot.symbol,
                lot.purchase_date,
                decimal_text(lot.quantity),
                decimal_text(lot.cost_basis),
                lot.source_tx_id.to_string(),
                lot.acquired_seq,
            ])?;
        }
        Ok(())
    }

    fn insert_realized_gain(&mut self, gain: &RealizedGain) -> Result<()> {
        self.conn.execute(
            "INSERT INTO realized_gains (id, portfolio_id, sell_tx_id, lot_id, symbol, sale_date,
                purchase_date, quantity, cost_basis, proceeds, gain, is_long_term)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                gain.id.to_string(),
                gain.portfolio_id.to_string(),
                gain.sell_tx_id.to_string(),
                gain.lot_id.to_string(),
                gain.symbol,
                gain.sale_date,
                gain.purchase_date,
                decimal_text(gain.quantity),
                decimal_text(gain.cost_basis),
                decimal_text(gain.proceeds),
                decimal_text(gain.gain),
                gain.is_long_term,
            ],
        )?;
        Ok(())
    }

    fn list_realized_gains(
        &self,
        portfolio_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RealizedGain>> {
        let sql = format!(
            "SELECT {} FROM realized_gains
             WHERE portfolio_id = ?1
               AND (?2 IS NULL OR sale_date >= ?2)
               AND (?3 IS NULL OR sale_date <= ?3)
             ORDER BY sale_date ASC, purchase_date ASC, id ASC",
            GAIN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![portfolio_id.to_string(), from, to], map_gain)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_realized_gains(&mut self, sell_tx_ids: &[Uuid]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("DELETE FROM realized_gains WHERE sell_tx_id = ?1")?;
        for id in sell_tx_ids {
            stmt.execute([id.to_string()])?;
        }
        Ok(())
    }

    fn insert_corporate_action(&mut self, action: &CorporateAction) -> Result<()> {
        self.conn.execute(
            "INSERT INTO corporate_actions (id, symbol, kind, effective_date, ratio,
                amount_per_share, new_symbol, allocation, applied, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                action.id.to_string(),
                action.symbol,
                action.kind.as_str(),
                action.effective_date,
                optional_decimal_text(action.ratio),
                optional_decimal_text(action.amount_per_share),
                action.new_symbol,
                optional_decimal_text(action.allocation),
                action.applied,
                action.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_corporate_action(&self, id: Uuid) -> Result<Option<CorporateAction>> {
        let sql = format!("SELECT {} FROM corporate_actions WHERE id = ?1", ACTION_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id.to_string()], map_corporate_action)
            .optional()?)
    }

    fn find_unapplied_corporate_actions(&self) -> Result<Vec<CorporateAction>> {
        let sql = format!(
            "SELECT {} FROM corporate_actions WHERE applied = 0
             ORDER BY effective_date ASC, created_at ASC",
            ACTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_corporate_action)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn mark_corporate_action_applied(&mut self, id: Uuid) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE corporate_actions SET applied = 1 WHERE id = ?1",
            [id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("corporate action {}", id)));
        }
        Ok(())
    }

    fn insert_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()> {
        self.conn.execute(
            "INSERT INTO portfolio_actions (id, portfolio_id, corporate_action_id, symbol, status,
                message, transaction_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                action.id.to_string(),
                action.portfolio_id.to_string(),
                action.corporate_action_id.to_string(),
                action.symbol,
                action.status.as_str(),
                action.message,
                action.transaction_id.map(|id| id.to_string()),
                action.created_at,
                action.updated_at,
            ],
        )?;
        Ok(())
    }

    fn list_portfolio_actions(
        &self,
        portfolio_id: Uuid,
        status: Option<PortfolioActionStatus>,
    ) -> Result<Vec<PortfolioAction>> {
        let sql = format!(
            "SELECT {} FROM portfolio_actions pa
             JOIN corporate_actions ca ON ca.id = pa.corporate_action_id
             WHERE pa.portfolio_id = ?1 AND (?2 IS NULL OR pa.status = ?2)
             ORDER BY ca.effective_date ASC, pa.created_at ASC",
            PORTFOLIO_ACTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![portfolio_id.to_string(), status.map(|s| s.as_str())],
            map_portfolio_action,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn update_portfolio_action(&mut self, action: &PortfolioAction) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE portfolio_actions SET status = ?2, message = ?3, transaction_id = ?4,
                updated_at = ?5
             WHERE id = ?1",
            params![
                action.id.to_string(),
                action.status.as_str(),
                action.message,
                action.transaction_id.map(|id| id.to_string()),
                action.updated_at,
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("portfolio action {}", action.id)));
        }
        Ok(())
    }

    fn upsert_snapshot(&mut self, snapshot: &PerformanceSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO performance_snapshots (id, portfolio_id, snapshot_date, total_value,
                total_cost_basis, total_return, total_return_pct, day_change, day_change_pct,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(portfolio_id, snapshot_date) DO UPDATE SET
                total_value = excluded.total_value,
                total_cost_basis = excluded.total_cost_basis,
                total_return = excluded.total_return,
                total_return_pct = excluded.total_return_pct,
                day_change = excluded.day_change,
                day_change_pct = excluded.day_change_pct,
                created_at = excluded.created_at",
            params![
                snapshot.id.to_string(),
                snapshot.portfolio_id.to_string(),
                snapshot.date,
                decimal_text(snapshot.total_value),
                decimal_text(snapshot.total_cost_basis),
                decimal_text(snapshot.total_return),
                decimal_text(snapshot.total_return_pct),
                optional_decimal_text(snapshot.day_change),
                optional_decimal_text(snapshot.day_change_pct),
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_snapshot(
        &self,
        portfolio_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PerformanceSnapshot>> {
        let sql = format!(
            "SELECT {} FROM performance_snapshots WHERE portfolio_id = ?1 AND snapshot_date = ?2",
            SNAPSHOT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![portfolio_id.to_string(), date], map_snapshot)
            .optional()?)
    }

    fn find_latest_snapshot(&self, portfolio_id: Uuid) -> Result<Option<PerformanceSnapshot>> {
        let sql = format!(
            "SELECT {} FROM performance_snapshots WHERE portfolio_id = ?1
             ORDER BY snapshot_date DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, [portfolio_id.to_string()], map_snapshot)
            .optional()?)
    }

    fn find_snapshots_in_range(
        &self,
        portfolio_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PerformanceSnapshot>> {
        let sql = format!(
            "SELECT {} FROM performance_snapshots
             WHERE portfolio_id = ?1 AND snapshot_date >= ?2 AND snapshot_date <= ?3
             ORDER BY snapshot_date ASC",
            SNAPSHOT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![portfolio_id.to_string(), from, to], map_snapshot)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
