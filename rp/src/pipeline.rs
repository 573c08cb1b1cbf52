//! Processing of a single row, end to end
//!
//! Load the row, read our offer, gather competitor offers, decide, push the
//! change to the marketplace and record the audit note. Every failure ends as
//! a note on the row; nothing escapes to the worker.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::{AuditLedger, PendingMutation, now_stamp};
use crate::marketplace::Marketplace;
use crate::pricing::{PricingDecision, PricingEngine};
use crate::row::{RowConfig, RowError, RowLoader};
use crate::scrape::{CategoryProduct, CompetitorOffer, Listing, Scraper};

/// Result of processing one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Row priced; `updated` is false when the offer was left alone
    Success { index: usize, updated: bool, note: String },
    /// Row is malformed
    ValidationFailure { index: usize, message: String },
    /// Something failed while processing a valid row
    ProcessingFailure { index: usize, message: String },
}

impl RowOutcome {
    pub fn index(&self) -> usize {
        match self {
            RowOutcome::Success { index, .. }
            | RowOutcome::ValidationFailure { index, .. }
            | RowOutcome::ProcessingFailure { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success { .. })
    }

    fn from_error(index: usize, error: &RowError) -> Self {
        if error.is_validation() {
            RowOutcome::ValidationFailure {
                index,
                message: error.to_string(),
            }
        } else {
            RowOutcome::ProcessingFailure {
                index,
                message: error.to_string(),
            }
        }
    }

    /// Audit note written to the row
    pub fn note(&self, timestamp: &str) -> String {
        match self {
            RowOutcome::Success { note, .. } => note.clone(),
            RowOutcome::ValidationFailure { index, message } => {
                format!("{}: VALIDATION ERROR AT ROW: {}: {}", timestamp, index, message)
            }
            RowOutcome::ProcessingFailure { message, .. } => format!("{}: FAILED: {}", timestamp, message),
        }
    }
}

/// Runs rows through scraping, pricing and the marketplace
pub struct RowProcessor {
    loader: Arc<RowLoader>,
    scraper: Arc<dyn Scraper>,
    marketplace: Arc<dyn Marketplace>,
    ledger: Arc<AuditLedger>,
    engine: PricingEngine,
    product_base_url: String,
}

impl RowProcessor {
    pub fn new(
        loader: Arc<RowLoader>,
        scraper: Arc<dyn Scraper>,
        marketplace: Arc<dyn Marketplace>,
        ledger: Arc<AuditLedger>,
        product_base_url: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            scraper,
            marketplace,
            ledger,
            engine: PricingEngine::new(),
            product_base_url: product_base_url.into(),
        }
    }

    pub fn loader(&self) -> &Arc<RowLoader> {
        &self.loader
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Process one row and record its note
    ///
    /// Returns the outcome and how long the worker should rest afterwards.
    pub fn process(&self, index: usize) -> (RowOutcome, Duration) {
        debug!(index, "process: called");
        let timestamp = now_stamp();
        let mut relax = self.loader.default_relax();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(index, &timestamp, &mut relax))) {
            Ok(Ok(decision)) => RowOutcome::Success {
                index,
                updated: decision.update.is_some(),
                note: decision.note,
            },
            Ok(Err(e)) => {
                warn!(index, error = %e, "Row failed");
                RowOutcome::from_error(index, &e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(index, %message, "Row panicked");
                RowOutcome::ProcessingFailure {
                    index,
                    message: format!("panic: {}", message),
                }
            }
        };

        if let Err(e) = self.ledger.record(index, PendingMutation::new(outcome.note(&timestamp), &timestamp)) {
            warn!(index, error = %e, "Failed to write note into cache, kept pending");
        }
        (outcome, relax)
    }

    fn evaluate(&self, index: usize, timestamp: &str, relax: &mut Duration) -> Result<PricingDecision, RowError> {
        let row = self.loader.load(index)?;
        *relax = row.relax();
        self.ledger.remember_row(row.clone());

        let own = self.marketplace.get_offer(&row.offer_id)?;
        let offers = self.competitor_offers(&row)?;
        let decision = self.engine.decide(&row, &own, &offers, timestamp, &mut rand::rng());

        if let Some(update) = &decision.update {
            self.marketplace
                .update_offer(&update.offer_id, update.price, update.declared_stock, update.min_quantity)?;
            info!(index, offer_id = %update.offer_id, target = ?decision.target, "Row repriced");
        } else {
            info!(index, "Row left unchanged");
        }
        Ok(decision)
    }

    /// Competitor offers for a row, expanding category listings
    pub fn competitor_offers(&self, row: &RowConfig) -> Result<Vec<CompetitorOffer>, RowError> {
        if !row.mode.scrapes() {
            return Ok(Vec::new());
        }
        let url = row
            .compare_url
            .as_deref()
            .ok_or_else(|| RowError::Validation("compare URL is empty".to_string()))?;

        match self.scraper.fetch_listing(url)? {
            Listing::Offers(offers) => Ok(offers),
            Listing::Products(products) => self.expand_products(row, &products),
        }
    }

    fn expand_products(&self, row: &RowConfig, products: &[CategoryProduct]) -> Result<Vec<CompetitorOffer>, RowError> {
        let eligible = self.engine.eligible_products(row, products);
        debug!(index = row.index, products = products.len(), eligible = eligible.len(), "expand_products: called");

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for product in eligible {
            let url = product.page_url(&self.product_base_url);
            match self.scraper.fetch_listing(&url)? {
                Listing::Offers(offers) => {
                    for offer in offers {
                        if seen.insert(offer.offer_id.clone()) {
                            merged.push(offer);
                        }
                    }
                }
                Listing::Products(_) => warn!(%url, "Product page lists products, skipping"),
            }
        }
        Ok(merged)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
