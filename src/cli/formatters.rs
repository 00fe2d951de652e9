//! Output formatting module for CLI display
//!
//! This module handles all terminal output formatting, separating
//! the concerns of data calculation from presentation.

use colored::Colorize;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use crate::db::{
    CorporateAction, Holding, PerformanceSnapshot, Portfolio, PortfolioAction,
    PortfolioActionStatus, TaxLot, Transaction,
};
use crate::importers::ImportReport;
use crate::money::Currency;
use crate::reports::{BenchmarkComparison, PortfolioMetrics};
use crate::tax::TaxReport;
use crate::utils::{format_amount, format_money, format_quantity, format_ratio_pct};

/// Pretty JSON for `--json` output.
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
}

fn signed(value: Decimal, text: String) -> String {
    if value >= Decimal::ZERO {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

fn signed_pct(value: Option<Decimal>) -> String {
    value
        .map(|v| signed(v, format_ratio_pct(v)))
        .unwrap_or_else(|| "N/A".to_string())
}

fn opt_amount(value: Option<Decimal>) -> String {
    value.map(format_amount).unwrap_or_default()
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn format_portfolios(portfolios: &[Portfolio]) -> String {
    if portfolios.is_empty() {
        return format!(
            "{} No portfolios yet\nCreate one with: {} portfolio create <name>\n",
            "ℹ".blue().bold(),
            "lotbook".bold()
        );
    }

    #[derive(Tabled)]
    struct PortfolioRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Currency")]
        currency: String,
        #[tabled(rename = "Policy")]
        policy: String,
        #[tabled(rename = "Description")]
        description: String,
        #[tabled(rename = "Id")]
        id: String,
    }

    let rows: Vec<PortfolioRow> = portfolios
        .iter()
        .map(|p| PortfolioRow {
            name: p.name.clone(),
            currency: p.base_currency.to_string(),
            policy: p.cost_basis_policy.as_str().to_string(),
            description: p.description.clone().unwrap_or_default(),
            id: p.id.to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}

/// Holdings table with a cost basis summary.
pub fn format_holdings(portfolio: &Portfolio, holdings: &[Holding]) -> String {
    let mut output = format!(
        "\n{} {} ({}, {})\n\n",
        "📊".cyan().bold(),
        portfolio.name.bold(),
        portfolio.base_currency,
        portfolio.cost_basis_policy.as_str()
    );

    if holdings.is_empty() {
        output.push_str(&format!(
            "{} No positions found\nRecord a trade with: {} tx add buy <symbol> <quantity> --price <price>\n",
            "ℹ".blue().bold(),
            "lotbook".bold()
        ));
        return output;
    }

    #[derive(Tabled)]
    struct HoldingRow {
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Avg Cost")]
        avg_cost: String,
        #[tabled(rename = "Cost Basis")]
        cost_basis: String,
    }

    let rows: Vec<HoldingRow> = holdings
        .iter()
        .map(|h| HoldingRow {
            symbol: h.symbol.clone(),
            quantity: format_quantity(h.quantity),
            avg_cost: format_amount(h.avg_cost),
            cost_basis: format_amount(h.cost_basis),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..), Alignment::right());
    output.push_str(&table.to_string());

    let total: Decimal = holdings.iter().map(|h| h.cost_basis).sum();
    output.push_str(&format!(
        "\n\n{:<20} {}\n",
        "Total Cost:".bold(),
        format_money(total, portfolio.base_currency)
    ));
    output
}

pub fn format_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return format!("{} No transactions\n", "ℹ".blue().bold());
    }

    #[derive(Tabled)]
    struct TransactionRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Fees")]
        commission: String,
        #[tabled(rename = "Cash")]
        cash: String,
        #[tabled(rename = "Detail")]
        detail: String,
        #[tabled(rename = "Id")]
        id: String,
    }

    let rows: Vec<TransactionRow> = transactions
        .iter()
        .map(|t| {
            let mut detail = Vec::new();
            if let Some(ratio) = t.ratio {
                detail.push(format!("ratio {}", ratio.normalize()));
            }
            if let Some(other) = &t.counterpart_symbol {
                detail.push(format!("→ {}", other));
            }
            if t.fx_rate != Decimal::ONE {
                detail.push(format!("{} @ {}", t.currency, t.fx_rate.normalize()));
            }
            TransactionRow {
                date: t.trade_date.to_string(),
                kind: t.kind.as_str().to_string(),
                symbol: t.symbol.clone(),
                quantity: format_quantity(t.quantity),
                price: opt_amount(t.price),
                commission: format_amount(t.commission),
                cash: opt_amount(t.cash_amount),
                detail: detail.join(", "),
                id: t.id.to_string(),
            }
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(3..7), Alignment::right());
    format!("{}\n", table)
}

pub fn format_lots(symbol: &str, lots: &[TaxLot]) -> String {
    if lots.is_empty() {
        return format!("{} No open lots for {}\n", "ℹ".blue().bold(), symbol);
    }

    #[derive(Tabled)]
    struct LotRow {
        #[tabled(rename = "Purchased")]
        date: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Cost Basis")]
        cost_basis: String,
        #[tabled(rename = "Per Share")]
        per_share: String,
        #[tabled(rename = "Lot")]
        id: String,
    }

    let rows: Vec<LotRow> = lots
        .iter()
        .map(|l| LotRow {
            date: l.purchase_date.to_string(),
            quantity: format_quantity(l.quantity),
            cost_basis: format_amount(l.cost_basis),
            per_share: if l.quantity.is_zero() {
                String::new()
            } else {
                format_amount(l.cost_basis / l.quantity)
            },
            id: l.id.to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..4), Alignment::right());
    format!("\n{} Open lots for {}\n\n{}\n", "📦".cyan(), symbol.bold(), table)
}

pub fn format_import_report(report: &ImportReport) -> String {
    let mut output = String::new();
    if report.dry_run {
        output.push_str(&format!(
            "\n{} Dry run - no changes saved\n",
            "ℹ".blue().bold()
        ));
        output.push_str(&format!("  Valid rows: {}\n", report.imported.to_string().green()));
    } else {
        output.push_str(&format!("\n{} Import complete!\n", "✓".green().bold()));
        output.push_str(&format!("  Batch:    {}\n", report.batch_id));
        output.push_str(&format!("  Imported: {}\n", report.imported.to_string().green()));
    }
    if !report.duplicates.is_empty() {
        output.push_str(&format!(
            "  Skipped (duplicates): {} (lines {})\n",
            report.duplicates.len().to_string().yellow(),
            report.duplicates.iter().join(", ")
        ));
    }
    if !report.errors.is_empty() {
        output.push_str(&format!("  Errors: {}\n", report.errors.len().to_string().red()));
        for error in &report.errors {
            output.push_str(&format!(
                "    line {}: {} {}\n",
                error.line_no,
                error.message.red(),
                format!("[{}]", error.raw).bright_black()
            ));
        }
    }
    output
}

pub fn format_tax_report(report: &TaxReport, currency: Currency) -> String {
    let mut output = format!("\n{} Realized Gains - {}\n\n", "📊".cyan().bold(), report.year);

    if report.entries.is_empty() {
        output.push_str(&format!(
            "{} No sales found for year {}\n",
            "ℹ".blue().bold(),
            report.year
        ));
        return output;
    }

    #[derive(Tabled)]
    struct GainRow {
        #[tabled(rename = "Sold")]
        sale_date: String,
        #[tabled(rename = "Acquired")]
        purchase_date: String,
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Proceeds")]
        proceeds: String,
        #[tabled(rename = "Cost Basis")]
        cost_basis: String,
        #[tabled(rename = "Gain")]
        gain: String,
        #[tabled(rename = "Term")]
        term: String,
    }

    let rows: Vec<GainRow> = report
        .entries
        .iter()
        .map(|g| GainRow {
            sale_date: g.sale_date.to_string(),
            purchase_date: g.purchase_date.to_string(),
            symbol: g.symbol.clone(),
            quantity: format_quantity(g.quantity),
            proceeds: format_amount(g.proceeds),
            cost_basis: format_amount(g.cost_basis),
            gain: signed(g.gain, format_amount(g.gain)),
            term: if g.is_long_term { "Long" } else { "Short" }.to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(3..7), Alignment::right());
    output.push_str(&table.to_string());

    output.push_str(&format!("\n\n{}\n", "By symbol:".bold()));
    for summary in &report.by_symbol {
        output.push_str(&format!(
            "  {:<10} short {}  long {}\n",
            summary.symbol,
            signed(summary.short_term, format_amount(summary.short_term)),
            signed(summary.long_term, format_amount(summary.long_term)),
        ));
    }

    output.push_str(&format!("\n{} Totals:\n", "📈".cyan().bold()));
    output.push_str(&format!("  Proceeds:   {}\n", format_money(report.total_proceeds, currency).cyan()));
    output.push_str(&format!("  Cost Basis: {}\n", format_money(report.total_cost_basis, currency)));
    output.push_str(&format!(
        "  Short Term: {}\n",
        signed(report.total_short_term, format_money(report.total_short_term, currency))
    ));
    output.push_str(&format!(
        "  Long Term:  {}\n",
        signed(report.total_long_term, format_money(report.total_long_term, currency))
    ));
    output.push_str(&format!(
        "  {} {}\n",
        "Net Gain:".bold(),
        signed(report.total, format_money(report.total, currency)).bold()
    ));
    output
}

pub fn format_metrics(
    metrics: &PortfolioMetrics,
    benchmark: Option<&BenchmarkComparison>,
    currency: Currency,
) -> String {
    let mut output = format!(
        "\n{} Performance {} → {}\n\n",
        "📈".cyan().bold(),
        metrics.from,
        metrics.to
    );

    let line = |label: &str, value: String| format!("{:<22} {}\n", label.bold(), value);
    output.push_str(&line("Market Value:", format_money(metrics.market_value, currency)));
    output.push_str(&line("Cost Basis:", format_money(metrics.cost_basis, currency)));
    output.push_str(&line(
        "Unrealized Gain:",
        signed(metrics.unrealized_gain, format_money(metrics.unrealized_gain, currency)),
    ));
    output.push_str(&line(
        "Realized Gain:",
        signed(metrics.realized_gain, format_money(metrics.realized_gain, currency)),
    ));
    output.push_str(&line("Dividends:", format_money(metrics.dividend_income, currency)));
    output.push_str(&line("Time-Weighted Return:", signed_pct(metrics.twr)));
    output.push_str(&line("  annualized:", signed_pct(metrics.annualized_twr)));
    let mwr = metrics.mwr.map(|m| {
        let rate = m.rate_decimal();
        let text = signed(rate, format_ratio_pct(rate));
        if m.converged {
            text
        } else {
            format!("{} {}", text, "(not converged)".yellow())
        }
    });
    output.push_str(&line(
        "Money-Weighted Return:",
        mwr.unwrap_or_else(|| "N/A".to_string()),
    ));

    if let Some(comparison) = benchmark {
        output.push_str(&format!(
            "\n{} vs {}\n",
            "Benchmark".bold(),
            comparison.benchmark.symbol.cyan()
        ));
        output.push_str(&line(
            "Benchmark Return:",
            signed_pct(Some(comparison.benchmark.total_return)),
        ));
        output.push_str(&line("  annualized:", signed_pct(comparison.benchmark.annualized_return)));
        output.push_str(&line("Alpha:", signed_pct(comparison.alpha)));
    }
    output
}

pub fn format_snapshot(snapshot: &PerformanceSnapshot, currency: Currency) -> String {
    let mut output = format!(
        "{} Snapshot {} recorded\n",
        "✓".green().bold(),
        snapshot.date
    );
    output.push_str(&format!("  Value:  {}\n", format_money(snapshot.total_value, currency)));
    output.push_str(&format!("  Cost:   {}\n", format_money(snapshot.total_cost_basis, currency)));
    output.push_str(&format!(
        "  Return: {}\n",
        signed(snapshot.total_return, format_money(snapshot.total_return, currency))
    ));
    if let Some(change) = snapshot.day_change {
        output.push_str(&format!(
            "  Change: {}\n",
            signed(change, format_money(change, currency))
        ));
    }
    output
}

pub fn format_announcements(actions: &[CorporateAction]) -> String {
    if actions.is_empty() {
        return format!("{} No announcements waiting\n", "ℹ".blue().bold());
    }

    #[derive(Tabled)]
    struct AnnouncementRow {
        #[tabled(rename = "Effective")]
        date: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Terms")]
        terms: String,
        #[tabled(rename = "Id")]
        id: String,
    }

    let rows: Vec<AnnouncementRow> = actions
        .iter()
        .map(|a| {
            let mut terms = Vec::new();
            if let Some(ratio) = a.ratio {
                terms.push(format!("ratio {}", ratio.normalize()));
            }
            if let Some(amount) = a.amount_per_share {
                terms.push(format!("{} per share", format_amount(amount)));
            }
            if let Some(symbol) = &a.new_symbol {
                terms.push(format!("→ {}", symbol));
            }
            if let Some(alpha) = a.allocation {
                terms.push(format!("allocation {}", format_ratio_pct(alpha)));
            }
            AnnouncementRow {
                date: a.effective_date.to_string(),
                kind: a.kind.as_str().to_string(),
                symbol: a.symbol.clone(),
                terms: terms.join(", "),
                id: a.id.to_string(),
            }
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}

pub fn format_portfolio_actions(actions: &[PortfolioAction]) -> String {
    if actions.is_empty() {
        return format!("{} No queued actions\n", "ℹ".blue().bold());
    }

    #[derive(Tabled)]
    struct ActionRow {
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Message")]
        message: String,
        #[tabled(rename = "Transaction")]
        transaction: String,
        #[tabled(rename = "Action")]
        action: String,
    }

    let rows: Vec<ActionRow> = actions
        .iter()
        .map(|a| {
            let status = match a.status {
                PortfolioActionStatus::Applied => a.status.as_str().green().to_string(),
                PortfolioActionStatus::Failed => a.status.as_str().red().to_string(),
                PortfolioActionStatus::Skipped => a.status.as_str().bright_black().to_string(),
                PortfolioActionStatus::Pending => a.status.as_str().yellow().to_string(),
            };
            ActionRow {
                symbol: a.symbol.clone(),
                status,
                message: a.message.clone().unwrap_or_default(),
                transaction: a.transaction_id.as_ref().map(short_id).unwrap_or_default(),
                action: short_id(&a.corporate_action_id),
            }
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}
