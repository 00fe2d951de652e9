use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::money::Currency;

/// Order in which tax lots are consumed by a sale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostBasisPolicy {
    #[default]
    Fifo,
    Lifo,
    SpecificLot,
}

impl CostBasisPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisPolicy::Fifo => "FIFO",
            CostBasisPolicy::Lifo => "LIFO",
            CostBasisPolicy::SpecificLot => "SPECIFIC_LOT",
        }
    }
}

impl FromStr for CostBasisPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FIFO" => Ok(CostBasisPolicy::Fifo),
            "LIFO" => Ok(CostBasisPolicy::Lifo),
            "SPECIFIC_LOT" | "SPECIFICLOT" | "SPECIFIC" => Ok(CostBasisPolicy::SpecificLot),
            _ => Err(Error::validation(format!("unknown cost basis policy '{}'", s))),
        }
    }
}

/// Portfolio owned by a single caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_currency: Currency,
    pub cost_basis_policy: CostBasisPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transaction kinds recorded in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Buy,
    Sell,
    Dividend,
    DividendReinvest,
    Split,
    Merger,
    Spinoff,
    TickerChange,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
            TransactionKind::Dividend => "DIVIDEND",
            TransactionKind::DividendReinvest => "DIVIDEND_REINVEST",
            TransactionKind::Split => "SPLIT",
            TransactionKind::Merger => "MERGER",
            TransactionKind::Spinoff => "SPINOFF",
            TransactionKind::TickerChange => "TICKER_CHANGE",
        }
    }

    /// Kinds that need a unit price.
    pub fn is_priced(&self) -> bool {
        matches!(
            self,
            TransactionKind::Buy | TransactionKind::Sell | TransactionKind::DividendReinvest
        )
    }

    /// Kinds produced by the corporate-action applier.
    pub fn is_corporate_action(&self) -> bool {
        matches!(
            self,
            TransactionKind::Split
                | TransactionKind::Merger
                | TransactionKind::Spinoff
                | TransactionKind::TickerChange
        )
    }

    /// Kinds that move shares between two symbols.
    pub fn links_symbols(&self) -> bool {
        matches!(
            self,
            TransactionKind::Merger | TransactionKind::Spinoff | TransactionKind::TickerChange
        )
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .trim()
            .to_ascii_uppercase()
            .replace(['-', ' '], "_")
            .as_str()
        {
            "BUY" | "B" => Ok(TransactionKind::Buy),
            "SELL" | "S" => Ok(TransactionKind::Sell),
            "DIVIDEND" | "DIV" => Ok(TransactionKind::Dividend),
            "DIVIDEND_REINVEST" | "DRIP" | "REINVEST" => Ok(TransactionKind::DividendReinvest),
            "SPLIT" => Ok(TransactionKind::Split),
            "MERGER" => Ok(TransactionKind::Merger),
            "SPINOFF" | "SPIN_OFF" => Ok(TransactionKind::Spinoff),
            "TICKER_CHANGE" | "RENAME" => Ok(TransactionKind::TickerChange),
            _ => Err(Error::validation(format!("unknown transaction kind '{}'", s))),
        }
    }
}

/// Validated, immutable ledger entry
///
/// Amounts are in `currency`; `fx_rate` converts them into the portfolio base
/// currency and is captured when the transaction is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub kind: TransactionKind,
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub commission: Decimal,
    pub currency: Currency,
    pub fx_rate: Decimal,
    /// Cash received for a dividend
    pub cash_amount: Option<Decimal>,
    pub ratio: Option<Decimal>,
    /// Destination symbol of a merger, spinoff or ticker change
    pub counterpart_symbol: Option<String>,
    /// Share of cost basis moved to the child of a spinoff
    pub allocation: Option<Decimal>,
    /// Lots chosen for a sale under the specific-lot policy, in order
    pub lot_selection: Vec<Uuid>,
    pub note: Option<String>,
    pub import_batch: Option<Uuid>,
    pub fingerprint: Option<String>,
    /// Insertion order, assigned by the store
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `quantity * price`, zero for unpriced kinds.
    pub fn gross_amount(&self) -> Decimal {
        self.quantity * self.price.unwrap_or(Decimal::ZERO)
    }

    /// Landed cost in base currency: `(qty * price + commission) * fx_rate`.
    pub fn total_cost_base(&self) -> Decimal {
        (self.gross_amount() + self.commission) * self.fx_rate
    }

    /// Net sale proceeds in base currency: `(qty * price - commission) * fx_rate`.
    pub fn proceeds_base(&self) -> Decimal {
        (self.gross_amount() - self.commission) * self.fx_rate
    }

    /// Dividend cash in base currency.
    pub fn cash_base(&self) -> Decimal {
        self.cash_amount.unwrap_or(Decimal::ZERO) * self.fx_rate
    }

    /// Symbols whose positions this transaction can change.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols = vec![self.symbol.clone()];
        if let Some(other) = &self.counterpart_symbol {
            if other != &self.symbol {
                symbols.push(other.clone());
            }
        }
        symbols
    }

    /// Replay order: trade date, then insertion order.
    pub fn replay_key(&self) -> (NaiveDate, i64) {
        (self.trade_date, self.seq)
    }
}

/// Unvalidated transaction payload as received from callers and importers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub symbol: String,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub commission: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub fx_rate: Option<Decimal>,
    #[serde(default)]
    pub cash_amount: Option<Decimal>,
    #[serde(default)]
    pub ratio: Option<Decimal>,
    #[serde(default)]
    pub counterpart_symbol: Option<String>,
    #[serde(default)]
    pub allocation: Option<Decimal>,
    #[serde(default)]
    pub lot_selection: Vec<Uuid>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub import_batch: Option<Uuid>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl TransactionDraft {
    pub fn new(
        kind: TransactionKind,
        symbol: &str,
        trade_date: NaiveDate,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            trade_date,
            quantity,
            price,
            commission: None,
            currency: None,
            fx_rate: None,
            cash_amount: None,
            ratio: None,
            counterpart_symbol: None,
            allocation: None,
            lot_selection: Vec::new(),
            note: None,
            import_batch: None,
            fingerprint: None,
        }
    }

    pub fn buy(symbol: &str, trade_date: NaiveDate, quantity: Decimal, price: Decimal) -> Self {
        Self::new(TransactionKind::Buy, symbol, trade_date, quantity, Some(price))
    }

    pub fn sell(symbol: &str, trade_date: NaiveDate, quantity: Decimal, price: Decimal) -> Self {
        Self::new(TransactionKind::Sell, symbol, trade_date, quantity, Some(price))
    }

    pub fn dividend(symbol: &str, trade_date: NaiveDate, cash: Decimal) -> Self {
        let mut draft = Self::new(TransactionKind::Dividend, symbol, trade_date, Decimal::ZERO, None);
        draft.cash_amount = Some(cash);
        draft
    }

    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission = Some(commission);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_lots(mut self, lots: Vec<Uuid>) -> Self {
        self.lot_selection = lots;
        self
    }
}

/// Current position for a (portfolio, symbol), derived from its lots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub avg_cost: Decimal,
}

/// Purchased batch of shares
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxLot {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    /// Transaction that created this lot (or the corporate action that derived it)
    pub source_tx_id: Uuid,
    /// Insertion order of the purchase the lot descends from; FIFO/LIFO tiebreak
    pub acquired_seq: i64,
}

impl TaxLot {
    pub fn cost_per_share(&self) -> crate::error::Result<Decimal> {
        crate::money::div_round(self.cost_basis, self.quantity)
    }
}

/// Gain or loss realised by one sale against one lot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealizedGain {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub sell_tx_id: Uuid,
    pub lot_id: Uuid,
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub proceeds: Decimal,
    pub gain: Decimal,
    pub is_long_term: bool,
}

/// Corporate action kinds that can be announced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorporateActionKind {
    Split,
    Dividend,
    Merger,
    Spinoff,
    TickerChange,
}

impl CorporateActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorporateActionKind::Split => "SPLIT",
            CorporateActionKind::Dividend => "DIVIDEND",
            CorporateActionKind::Merger => "MERGER",
            CorporateActionKind::Spinoff => "SPINOFF",
            CorporateActionKind::TickerChange => "TICKER_CHANGE",
        }
    }

    pub fn needs_new_symbol(&self) -> bool {
        matches!(
            self,
            CorporateActionKind::Merger
                | CorporateActionKind::Spinoff
                | CorporateActionKind::TickerChange
        )
    }
}

impl FromStr for CorporateActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match TransactionKind::from_str(s)? {
            TransactionKind::Split => Ok(CorporateActionKind::Split),
            TransactionKind::Dividend => Ok(CorporateActionKind::Dividend),
            TransactionKind::Merger => Ok(CorporateActionKind::Merger),
            TransactionKind::Spinoff => Ok(CorporateActionKind::Spinoff),
            TransactionKind::TickerChange => Ok(CorporateActionKind::TickerChange),
            _ => Err(Error::validation(format!(
                "'{}' is not a corporate action",
                s
            ))),
        }
    }
}

/// Issuer event announcement, shared by all portfolios
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorporateAction {
    pub id: Uuid,
    pub symbol: String,
    pub kind: CorporateActionKind,
    pub effective_date: NaiveDate,
    pub ratio: Option<Decimal>,
    pub amount_per_share: Option<Decimal>,
    pub new_symbol: Option<String>,
    pub allocation: Option<Decimal>,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a queued corporate action for one portfolio
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortfolioActionStatus {
    Pending,
    Applied,
    Skipped,
    Failed,
}

impl PortfolioActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioActionStatus::Pending => "PENDING",
            PortfolioActionStatus::Applied => "APPLIED",
            PortfolioActionStatus::Skipped => "SKIPPED",
            PortfolioActionStatus::Failed => "FAILED",
        }
    }

    /// Pending and Failed actions may still be (re)applied.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PortfolioActionStatus::Pending | PortfolioActionStatus::Failed
        )
    }
}

impl FromStr for PortfolioActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PortfolioActionStatus::Pending),
            "APPLIED" => Ok(PortfolioActionStatus::Applied),
            "SKIPPED" => Ok(PortfolioActionStatus::Skipped),
            "FAILED" => Ok(PortfolioActionStatus::Failed),
            _ => Err(Error::validation(format!("unknown action status '{}'", s))),
        }
    }
}

/// Corporate action queued against one portfolio's holding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioAction {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub corporate_action_id: Uuid,
    pub symbol: String,
    pub status: PortfolioActionStatus,
    pub message: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dated portfolio valuation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub date: NaiveDate,
    pub total_value: Decimal,
    pub total_cost_basis: Decimal,
    pub total_return: Decimal,
    /// Percentage (x100) of total cost basis
    pub total_return_pct: Decimal,
    pub day_change: Option<Decimal>,
    pub day_change_pct: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}
