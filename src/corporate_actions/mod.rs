// Corporate actions module - issuer events applied to holdings and tax lots
//
// Direct application (split, dividend, merger, spinoff, ticker change) records
// an audit transaction through the position engine. Announcements are global:
// `distribute` queues one PortfolioAction per portfolio holding the symbol and
// `apply_pending` works through a portfolio's queue.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    authorize, CorporateAction, CorporateActionKind, PortfolioAction,
    PortfolioActionStatus, Store, StoreTx, Transaction, TransactionDraft, TransactionKind,
};
use crate::engine::{self, normalize_symbol};
use crate::error::{Error, Result};

/// Share of cost basis a spinoff child receives when none is given (10%)
pub const DEFAULT_SPINOFF_ALLOCATION: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Every structural action needs an existing holding of the pre-action symbol.
pub fn check_preconditions(unit: &dyn StoreTx, tx: &Transaction) -> Result<()> {
    if !tx.kind.is_corporate_action() {
        return Ok(());
    }
    match unit.get_holding(tx.portfolio_id, &tx.symbol)? {
        Some(_) => Ok(()),
        None => Err(Error::not_found(format!(
            "holding of {} required for {}",
            tx.symbol,
            tx.kind.as_str()
        ))),
    }
}

fn event(kind: TransactionKind, symbol: &str, date: NaiveDate) -> TransactionDraft {
    TransactionDraft::new(kind, symbol, date, Decimal::ZERO, None)
}

/// Multiply every lot of `symbol` by `ratio`; cost basis is unchanged.
pub fn apply_split<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    symbol: &str,
    date: NaiveDate,
    ratio: Decimal,
) -> Result<Transaction> {
    let mut draft = event(TransactionKind::Split, symbol, date);
    draft.ratio = Some(ratio);
    engine::apply_transaction(store, owner_id, portfolio_id, draft)
}

/// Cash-only record; positions are untouched.
pub fn record_dividend<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    symbol: &str,
    date: NaiveDate,
    cash: Decimal,
) -> Result<Transaction> {
    engine::apply_transaction(
        store,
        owner_id,
        portfolio_id,
        TransactionDraft::dividend(symbol, date, cash),
    )
}

/// Move the whole position of `old` into `new` at `ratio` new shares per old share.
pub fn apply_merger<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    old: &str,
    new: &str,
    date: NaiveDate,
    ratio: Decimal,
) -> Result<Transaction> {
    let mut draft = event(TransactionKind::Merger, old, date);
    draft.ratio = Some(ratio);
    draft.counterpart_symbol = Some(new.to_string());
    engine::apply_transaction(store, owner_id, portfolio_id, draft)
}

/// Grant `ratio` child shares per parent share and move `allocation` of the
/// parent's cost basis to the child ([`DEFAULT_SPINOFF_ALLOCATION`] if absent).
#[allow(clippy::too_many_arguments)]
pub fn apply_spinoff<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    parent: &str,
    child: &str,
    date: NaiveDate,
    ratio: Decimal,
    allocation: Option<Decimal>,
) -> Result<Transaction> {
    let mut draft = event(TransactionKind::Spinoff, parent, date);
    draft.ratio = Some(ratio);
    draft.counterpart_symbol = Some(child.to_string());
    draft.allocation = allocation;
    engine::apply_transaction(store, owner_id, portfolio_id, draft)
}

/// Rename `old` to `new`, keeping every lot and rewriting history.
pub fn apply_ticker_change<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    old: &str,
    new: &str,
    date: NaiveDate,
) -> Result<Transaction> {
    let mut draft = event(TransactionKind::TickerChange, old, date);
    draft.counterpart_symbol = Some(new.to_string());
    engine::apply_transaction(store, owner_id, portfolio_id, draft)
}

/// Issuer event as announced, before validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub symbol: String,
    pub kind: CorporateActionKind,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub ratio: Option<Decimal>,
    #[serde(default)]
    pub amount_per_share: Option<Decimal>,
    #[serde(default)]
    pub new_symbol: Option<String>,
    #[serde(default)]
    pub allocation: Option<Decimal>,
}

fn positive(value: Option<Decimal>, what: &str, kind: CorporateActionKind) -> Result<Decimal> {
    match value {
        Some(v) if v > Decimal::ZERO => Ok(v),
        _ => Err(Error::validation(format!(
            "{} announcement needs a positive {}",
            kind.as_str(),
            what
        ))),
    }
}

/// Validate and store a global corporate action.
pub fn announce<S: Store>(store: &S, announcement: Announcement) -> Result<CorporateAction> {
    let kind = announcement.kind;
    let symbol = normalize_symbol(&announcement.symbol)?;
    let new_symbol = announcement
        .new_symbol
        .as_deref()
        .map(normalize_symbol)
        .transpose()?;

    let mut ratio = None;
    let mut amount_per_share = None;
    let mut allocation = None;
    match kind {
        CorporateActionKind::Split => ratio = Some(positive(announcement.ratio, "ratio", kind)?),
        CorporateActionKind::Dividend => {
            amount_per_share = Some(positive(
                announcement.amount_per_share,
                "amount per share",
                kind,
            )?)
        }
        CorporateActionKind::Merger => ratio = Some(positive(announcement.ratio, "ratio", kind)?),
        CorporateActionKind::Spinoff => {
            ratio = Some(positive(announcement.ratio, "ratio", kind)?);
            if let Some(alpha) = announcement.allocation {
                if alpha <= Decimal::ZERO || alpha >= Decimal::ONE {
                    return Err(Error::validation(format!(
                        "spinoff allocation must be between 0 and 1 exclusive, got {}",
                        alpha
                    )));
                }
                allocation = Some(alpha);
            }
        }
        CorporateActionKind::TickerChange => {}
    }

    if kind.needs_new_symbol() {
        match new_symbol.as_deref() {
            None => {
                return Err(Error::validation(format!(
                    "{} announcement needs a new symbol",
                    kind.as_str()
                )))
            }
            Some(s) if s == symbol => {
                return Err(Error::validation(format!(
                    "new symbol must differ from {}",
                    symbol
                )))
            }
            Some(_) => {}
        }
    }

    let action = CorporateAction {
        id: Uuid::new_v4(),
        symbol,
        kind,
        effective_date: announcement.effective_date,
        ratio,
        amount_per_share,
        new_symbol: if kind.needs_new_symbol() { new_symbol } else { None },
        allocation,
        applied: false,
        created_at: Utc::now(),
    };
    store.write(|unit| unit.insert_corporate_action(&action))?;

    info!(
        "Announced {} for {} effective {}",
        action.kind.as_str(),
        action.symbol,
        action.effective_date
    );
    Ok(action)
}

/// Announcements not yet distributed to portfolios.
pub fn list_unapplied<S: Store>(store: &S) -> Result<Vec<CorporateAction>> {
    store.read(|unit| unit.find_unapplied_corporate_actions())
}

/// Queue an announcement for every portfolio currently holding its symbol.
pub fn distribute<S: Store>(store: &S, action_id: Uuid) -> Result<Vec<PortfolioAction>> {
    store.write(|unit| {
        let action = unit
            .get_corporate_action(action_id)?
            .ok_or_else(|| Error::not_found(format!("corporate action {}", action_id)))?;
        if action.applied {
            return Err(Error::Conflict(format!(
                "corporate action {} was already distributed",
                action_id
            )));
        }

        let now = Utc::now();
        let mut queued = Vec::new();
        for portfolio_id in unit.portfolios_holding_symbol(&action.symbol)? {
            let entry = PortfolioAction {
                id: Uuid::new_v4(),
                portfolio_id,
                corporate_action_id: action.id,
                symbol: action.symbol.clone(),
                status: PortfolioActionStatus::Pending,
                message: None,
                transaction_id: None,
                created_at: now,
                updated_at: now,
            };
            unit.insert_portfolio_action(&entry)?;
            queued.push(entry);
        }
        unit.mark_corporate_action_applied(action.id)?;

        info!(
            "Distributed {} {} to {} portfolio(s)",
            action.kind.as_str(),
            action.symbol,
            queued.len()
        );
        Ok(queued)
    })
}

pub fn list_actions<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    status: Option<PortfolioActionStatus>,
) -> Result<Vec<PortfolioAction>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.list_portfolio_actions(portfolio_id, status)
    })
}

/// Translate an announcement into the audit transaction for a position of
/// `quantity` shares held on the effective date.
fn draft_for(
    action: &CorporateAction,
    symbol: &str,
    quantity: Decimal,
    default_allocation: Decimal,
) -> TransactionDraft {
    let kind = match action.kind {
        CorporateActionKind::Split => TransactionKind::Split,
        CorporateActionKind::Dividend => TransactionKind::Dividend,
        CorporateActionKind::Merger => TransactionKind::Merger,
        CorporateActionKind::Spinoff => TransactionKind::Spinoff,
        CorporateActionKind::TickerChange => TransactionKind::TickerChange,
    };
    let mut draft = event(kind, symbol, action.effective_date);
    draft.ratio = action.ratio;
    draft.counterpart_symbol = action.new_symbol.clone();
    match action.kind {
        CorporateActionKind::Dividend => {
            let per_share = action.amount_per_share.unwrap_or_default();
            draft.cash_amount = Some(per_share * quantity);
            draft.ratio = None;
            draft.note = Some(format!("{} per share on {} shares", per_share, quantity));
        }
        CorporateActionKind::Spinoff => {
            draft.allocation = Some(action.allocation.unwrap_or(default_allocation));
        }
        _ => {}
    }
    draft
}

/// Apply every open (pending or failed) action of the portfolio that is due.
///
/// Actions run in effective-date order, each in its own unit. A failure marks
/// only that action Failed and the rest continue.
pub fn apply_pending<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    default_allocation: Decimal,
) -> Result<Vec<PortfolioAction>> {
    let today = Utc::now().date_naive();
    let mut due = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        let mut due = Vec::new();
        for entry in unit.list_portfolio_actions(portfolio_id, None)? {
            if !entry.status.is_open() {
                continue;
            }
            let action = unit
                .get_corporate_action(entry.corporate_action_id)?
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "portfolio action {} refers to missing corporate action {}",
                        entry.id, entry.corporate_action_id
                    ))
                })?;
            if action.effective_date <= today {
                due.push((entry, action));
            }
        }
        Ok(due)
    })?;
    due.sort_by_key(|(entry, action)| (action.effective_date, entry.created_at));

    let mut outcomes = Vec::with_capacity(due.len());
    for (entry, action) in due {
        let attempt = entry.clone();
        let result = store.write(|unit| {
            let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
            let mut done = attempt;
            done.updated_at = Utc::now();
            let held_then = engine::book_as_of(&*unit, &portfolio, action.effective_date)?
                .quantity(&done.symbol);
            match unit.get_holding(portfolio.id, &done.symbol)? {
                None => {
                    done.status = PortfolioActionStatus::Skipped;
                    done.message = Some(format!("no holding of {} on record", done.symbol));
                }
                Some(_) if held_then.is_zero() => {
                    done.status = PortfolioActionStatus::Skipped;
                    done.message = Some(format!(
                        "no holding of {} on {}",
                        done.symbol, action.effective_date
                    ));
                }
                Some(_) => {
                    let draft = draft_for(&action, &done.symbol, held_then, default_allocation);
                    let tx = engine::apply_in(unit, &portfolio, draft, today)?;
                    done.status = PortfolioActionStatus::Applied;
                    done.message = None;
                    done.transaction_id = Some(tx.id);
                }
            }
            unit.update_portfolio_action(&done)?;
            Ok(done)
        });

        match result {
            Ok(done) => {
                info!(
                    "{} {} for {} in portfolio {}",
                    done.status.as_str(),
                    action.kind.as_str(),
                    done.symbol,
                    portfolio_id
                );
                outcomes.push(done);
            }
            Err(err @ Error::Unauthorized(_)) => return Err(err),
            Err(err) => {
                warn!(
                    "Failed to apply {} for {}: {}",
                    action.kind.as_str(),
                    entry.symbol,
                    err
                );
                let mut failed = entry;
                failed.status = PortfolioActionStatus::Failed;
                failed.message = Some(err.to_string());
                failed.updated_at = Utc::now();
                store.write(|unit| unit.update_portfolio_action(&failed))?;
                outcomes.push(failed);
            }
        }
    }
    Ok(outcomes)
}
