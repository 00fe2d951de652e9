// Tax module - lot allocation and annual realized-gain reports

pub mod cost_basis;
pub mod report;

pub use cost_basis::{allocate, is_long_term, order_lots, LotAllocation, LONG_TERM_DAYS};
pub use report::{generate_report, SymbolTaxSummary, TaxReport};
