// Reports module - valuation snapshots and performance analytics

pub mod performance;
pub mod snapshot;

pub use performance::{
    calculate_performance, get_period_dates, portfolio_metrics, snapshot_near, BenchmarkComparison,
    BenchmarkReturn, MwrResult, Period, PortfolioMetrics, TwrReport,
};
