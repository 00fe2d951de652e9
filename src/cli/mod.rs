use clap::{Args, Parser, Subcommand};

pub mod formatters;
pub mod runner;

#[derive(Parser)]
#[command(name = "lotbook")]
#[command(version, about = "Portfolio bookkeeping with tax lots and corporate actions")]
#[command(
    long_about = "Track positions, tax lots and realized gains across portfolios, apply corporate actions, and report performance and capital gains."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Portfolio name or id (defaults to the only portfolio, if there is one)
    #[arg(short, long, global = true)]
    pub portfolio: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Portfolio management and viewing
    Portfolio {
        #[command(subcommand)]
        action: PortfolioCommands,
    },

    /// Manual transaction management
    Tx {
        #[command(subcommand)]
        action: TxCommands,
    },

    /// Import transactions from a CSV file
    /// (date,symbol,type,quantity,price,commission,currency,note)
    Import {
        /// Path to the CSV file
        file: String,

        /// Validate only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Remove every transaction of an import batch
    ImportUndo {
        /// Batch id printed by `import`
        batch: String,
    },

    /// Record a valuation snapshot
    Snapshot {
        /// Price in base currency, e.g. --price AAPL=190.5 (repeatable)
        #[arg(long = "price")]
        prices: Vec<String>,

        /// Fetch current quotes instead of using --price
        #[arg(long, conflicts_with = "prices")]
        live: bool,

        /// Snapshot date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Realized gains report for a calendar year
    Tax {
        /// Year (e.g., 2024)
        year: i32,
    },

    /// Performance analysis over a date range
    Performance {
        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        to: Option<String>,

        /// Named period instead of --from/--to (MTD, QTD, YTD, 1Y, ALL)
        #[arg(long, conflicts_with = "from")]
        period: Option<String>,

        /// Compare against a benchmark symbol (e.g., SPY)
        #[arg(short, long)]
        benchmark: Option<String>,
    },

    /// Corporate actions (announcements and their application)
    Actions {
        #[command(subcommand)]
        action: ActionCommands,
    },
}

#[derive(Subcommand)]
pub enum PortfolioCommands {
    /// Create a portfolio
    Create {
        name: String,

        /// Base currency (ISO code)
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Cost basis policy (FIFO, LIFO, SPECIFIC_LOT)
        #[arg(long, default_value = "FIFO")]
        policy: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// List portfolios
    List,

    /// Show holdings with cost basis
    Show,

    /// Rename, describe or change the cost basis policy
    Update {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        policy: Option<String>,
    },

    /// Delete a portfolio and everything in it
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record a transaction
    Add(TxAddArgs),

    /// Remove a transaction and recompute affected positions
    Remove {
        /// Transaction id
        id: String,
    },

    /// List transactions
    List {
        /// Only this symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Show open tax lots for a symbol
    Lots {
        symbol: String,
    },

    /// Rebuild a symbol's lots and holding from its transactions
    Recalculate {
        symbol: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct TxAddArgs {
    /// BUY, SELL, DIVIDEND, DIVIDEND_REINVEST, SPLIT, MERGER, SPINOFF, TICKER_CHANGE
    pub kind: String,

    pub symbol: String,

    /// Shares (omit for dividends and corporate actions)
    pub quantity: Option<String>,

    /// Unit price
    #[arg(long)]
    pub price: Option<String>,

    /// Trade date (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub commission: Option<String>,

    /// Transaction currency (defaults to the portfolio base currency)
    #[arg(long)]
    pub currency: Option<String>,

    /// Units of base currency per unit of --currency (fetched when omitted)
    #[arg(long)]
    pub fx_rate: Option<String>,

    /// Dividend cash amount
    #[arg(long)]
    pub cash: Option<String>,

    /// Split, merger or spinoff ratio
    #[arg(long)]
    pub ratio: Option<String>,

    /// Counterpart symbol for mergers, spinoffs and ticker changes
    #[arg(long = "into")]
    pub counterpart: Option<String>,

    /// Share of cost basis moved to a spinoff child (0-1)
    #[arg(long)]
    pub allocation: Option<String>,

    /// Lot ids to sell from, comma separated (SPECIFIC_LOT portfolios)
    #[arg(long, value_delimiter = ',')]
    pub lots: Vec<String>,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Subcommand)]
pub enum ActionCommands {
    /// Announce a corporate action for a symbol
    Announce(AnnounceArgs),

    /// Queue an announcement for every portfolio holding the symbol
    Distribute {
        /// Corporate action id
        id: String,
    },

    /// Apply queued actions to the selected portfolio
    Apply,

    /// List queued actions of the selected portfolio
    List {
        /// PENDING, APPLIED, SKIPPED or FAILED
        #[arg(long)]
        status: Option<String>,
    },

    /// Announcements not yet distributed
    Unapplied,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AnnounceArgs {
    /// SPLIT, DIVIDEND, MERGER, SPINOFF, TICKER_CHANGE
    pub kind: String,

    pub symbol: String,

    /// Effective date (YYYY-MM-DD)
    #[arg(long)]
    pub date: String,

    #[arg(long)]
    pub ratio: Option<String>,

    /// Dividend per share
    #[arg(long)]
    pub amount: Option<String>,

    /// Replacement or child symbol
    #[arg(long = "into")]
    pub new_symbol: Option<String>,

    #[arg(long)]
    pub allocation: Option<String>,
}
