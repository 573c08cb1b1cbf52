//! Repricer - batch marketplace repricing driven by a remote table
//!
//! Each flagged row of the main table names one of our marketplace offers,
//! where to look for competitors, and the bounds to stay within. A run walks
//! the flagged rows in batches on a pool of worker threads, reprices each
//! offer, and writes an audit note back to the row.
//!
//! # Architecture
//!
//! ```text
//! BatchScheduler
//! └── worker threads (one pool per batch)
//!     └── RowProcessor
//!         ├── RowLoader ──── sheetcache::CacheRegistry
//!         ├── Scraper        (competitor listings)
//!         ├── PricingEngine  (pure decision logic)
//!         ├── Marketplace    (own offer read + update)
//!         └── AuditLedger    (notes, flushed once per batch)
//! ```

pub mod audit;
pub mod cli;
pub mod config;
pub mod marketplace;
pub mod pipeline;
pub mod price;
pub mod pricing;
pub mod row;
pub mod scheduler;
pub mod scrape;

pub use audit::{AuditLedger, PendingMutation, now_stamp};
pub use config::Config;
pub use marketplace::{Marketplace, MarketplaceClient, MarketplaceError, Money, OfferUpdate, OwnOffer};
pub use pipeline::{RowOutcome, RowProcessor};
pub use price::{CommissionRule, CustomerPay, PriceIwtr};
pub use pricing::{PricingBasis, PricingDecision, PricingEngine};
pub use row::{ColumnLayout, CompareMode, JitterBand, RowConfig, RowError, RowLoader};
pub use scheduler::{BatchScheduler, RunSummary};
pub use scrape::{CategoryProduct, CompetitorOffer, HttpScraper, Listing, ScrapeError, Scraper};
