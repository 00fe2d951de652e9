//! Portfolio lifecycle, owner-scoped

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::{authorize, CostBasisPolicy, Portfolio, Store, StoreTx};
use crate::error::{Error, Result};
use crate::money::Currency;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_currency: Currency,
    #[serde(default)]
    pub cost_basis_policy: CostBasisPolicy,
}

/// Fields that may change after creation. Owner and base currency are fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub cost_basis_policy: Option<CostBasisPolicy>,
}

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("portfolio name must not be empty"));
    }
    Ok(name.to_string())
}

fn ensure_name_free(
    unit: &dyn StoreTx,
    owner_id: Uuid,
    name: &str,
    except: Option<Uuid>,
) -> Result<()> {
    if let Some(existing) = unit.find_portfolio_by_name(owner_id, name)? {
        if Some(existing.id) != except {
            return Err(Error::validation(format!(
                "a portfolio named '{}' already exists",
                name
            )));
        }
    }
    Ok(())
}

pub fn create_portfolio<S: Store>(
    store: &S,
    owner_id: Uuid,
    draft: PortfolioDraft,
) -> Result<Portfolio> {
    let name = clean_name(&draft.name)?;
    let now = Utc::now();
    let portfolio = Portfolio {
        id: Uuid::new_v4(),
        owner_id,
        name,
        description: draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        base_currency: draft.base_currency,
        cost_basis_policy: draft.cost_basis_policy,
        created_at: now,
        updated_at: now,
    };

    store.write(|unit| {
        ensure_name_free(&*unit, owner_id, &portfolio.name, None)?;
        unit.insert_portfolio(&portfolio)
    })?;

    info!(
        "Created portfolio '{}' ({}) in {} using {}",
        portfolio.name,
        portfolio.id,
        portfolio.base_currency,
        portfolio.cost_basis_policy.as_str()
    );
    Ok(portfolio)
}

pub fn get_portfolio<S: Store>(store: &S, owner_id: Uuid, portfolio_id: Uuid) -> Result<Portfolio> {
    store.read(|unit| authorize(unit, owner_id, portfolio_id))
}

pub fn find_portfolio<S: Store>(store: &S, owner_id: Uuid, name: &str) -> Result<Portfolio> {
    let name = clean_name(name)?;
    store.read(|unit| {
        unit.find_portfolio_by_name(owner_id, &name)?
            .ok_or_else(|| Error::not_found(format!("portfolio '{}'", name)))
    })
}

pub fn list_portfolios<S: Store>(store: &S, owner_id: Uuid) -> Result<Vec<Portfolio>> {
    store.read(|unit| unit.list_portfolios(owner_id))
}

/// Apply `update`. A policy change recomputes every lot and realized gain.
pub fn update_portfolio<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    update: PortfolioUpdate,
) -> Result<Portfolio> {
    store.write(|unit| {
        let mut portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        if let Some(name) = update.name.as_deref() {
            let name = clean_name(name)?;
            ensure_name_free(&*unit, owner_id, &name, Some(portfolio.id))?;
            portfolio.name = name;
        }
        if let Some(description) = update.description {
            portfolio.description = description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
        }
        let policy_changed = update
            .cost_basis_policy
            .is_some_and(|p| p != portfolio.cost_basis_policy);
        if let Some(policy) = update.cost_basis_policy {
            portfolio.cost_basis_policy = policy;
        }
        portfolio.updated_at = Utc::now();
        unit.update_portfolio(&portfolio)?;

        if policy_changed {
            super::rebuild_all(unit, &portfolio)?;
        }
        info!("Updated portfolio '{}' ({})", portfolio.name, portfolio.id);
        Ok(portfolio)
    })
}

/// Delete a portfolio and everything it owns.
pub fn delete_portfolio<S: Store>(store: &S, owner_id: Uuid, portfolio_id: Uuid) -> Result<()> {
    store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        unit.delete_portfolio(portfolio.id)?;
        info!("Deleted portfolio '{}' ({})", portfolio.name, portfolio.id);
        Ok(())
    })
}
