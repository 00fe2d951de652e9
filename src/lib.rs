//! Lotbook - portfolio bookkeeping with tax lots
//!
//! This library tracks portfolios of securities: transactions, the FIFO/LIFO/
//! specific-lot tax lots they create, realized gains, corporate actions,
//! valuation snapshots with time- and money-weighted returns, and yearly
//! capital gains reports.

pub mod cli;
pub mod config;
pub mod corporate_actions;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod importers;
pub mod ledger;
pub mod money;
pub mod pricing;
pub mod reports;
pub mod tax;
pub mod utils;
