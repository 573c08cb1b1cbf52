//! Pricing decisions
//!
//! Pure logic: given a row, our own offer and the competitor offers, pick a
//! target comparable unit price and describe the result in an audit note.
//! Nothing here talks to the network.

use rand::Rng;
use std::fmt;
use tracing::debug;

use crate::marketplace::{OfferUpdate, OwnOffer};
use crate::price::{CustomerPay, api_unit_price, comparable_unit_price, customer_pay_for_order, round_to};
use crate::row::{CompareMode, RowConfig};
use crate::scrape::{CategoryProduct, CompetitorOffer};

/// Why the engine picked its target
#[derive(Debug, Clone, PartialEq)]
pub enum PricingBasis {
    /// Comparison disabled for the row
    Floor,
    /// No eligible competitor, priced at the ceiling
    Ceiling,
    /// No eligible competitor and no ceiling
    FloorNoCompetitor,
    /// Undercut the cheapest eligible competitor
    Undercut { seller: String, unit_price: f64 },
    /// Own price already beats the cheapest competitor
    AlreadyBeating { seller: String, unit_price: f64 },
}

/// Outcome of pricing one row
#[derive(Debug, Clone, PartialEq)]
pub struct PricingDecision {
    /// Target comparable unit price; `None` leaves the offer alone
    pub target: Option<f64>,
    pub basis: PricingBasis,
    pub note: String,
    /// Marketplace change to apply, present whenever `target` is
    pub update: Option<OfferUpdate>,
    pub customer_pay: Option<CustomerPay>,
    pub floor: f64,
    pub ceiling: Option<f64>,
    pub best: Option<CompetitorOffer>,
    pub own_unit_price: f64,
}

/// Stateless pricing rules
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingEngine;

impl PricingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether a comparable unit price lies inside the row's bounds
    pub fn in_bounds(row: &RowConfig, comparable: f64) -> bool {
        comparable >= row.floor && row.ceiling.is_none_or(|ceiling| comparable <= ceiling)
    }

    /// Offers that count as competition, with their comparable unit prices
    ///
    /// Blacklisted sellers, our own offer and anything outside the bounds are
    /// dropped. Order is preserved.
    pub fn eligible<'a>(
        &self,
        row: &RowConfig,
        own_offer_id: &str,
        offers: &'a [CompetitorOffer],
    ) -> Vec<(&'a CompetitorOffer, f64)> {
        offers
            .iter()
            .filter(|offer| offer.offer_id != own_offer_id && offer.offer_id != row.offer_id)
            .filter(|offer| !row.blacklist.iter().any(|name| name == &offer.seller))
            .map(|offer| (offer, comparable_unit_price(offer.unit_price, row.unit_stock)))
            .filter(|(_, comparable)| Self::in_bounds(row, *comparable))
            .collect()
    }

    /// Cheapest eligible offer; ties keep the earliest
    pub fn best<'a>(&self, eligible: &[(&'a CompetitorOffer, f64)]) -> Option<(&'a CompetitorOffer, f64)> {
        let mut best: Option<(&CompetitorOffer, f64)> = None;
        for &(offer, comparable) in eligible {
            if best.is_none_or(|(_, current)| comparable < current) {
                best = Some((offer, comparable));
            }
        }
        best
    }

    /// Category products worth expanding into their own offer pages
    pub fn eligible_products<'a>(&self, row: &RowConfig, products: &'a [CategoryProduct]) -> Vec<&'a CategoryProduct> {
        products
            .iter()
            .filter(|p| Self::in_bounds(row, comparable_unit_price(p.unit_price, row.unit_stock)))
            .collect()
    }

    /// Decide the new price for a row
    ///
    /// `offers` is ignored when the row's comparison mode is off.
    pub fn decide<R: Rng>(
        &self,
        row: &RowConfig,
        own: &OwnOffer,
        offers: &[CompetitorOffer],
        timestamp: &str,
        rng: &mut R,
    ) -> PricingDecision {
        debug!(index = row.index, mode = %row.mode, offers = offers.len(), "decide: called");
        let own_unit_price = comparable_unit_price(own.unit_price, row.unit_stock);

        let eligible = if row.mode.scrapes() {
            self.eligible(row, &own.id, offers)
        } else {
            Vec::new()
        };
        let best = self.best(&eligible);

        let (raw_target, basis) = match best {
            _ if row.mode == CompareMode::Off => (row.floor, PricingBasis::Floor),
            None => match row.ceiling {
                Some(ceiling) => (ceiling, PricingBasis::Ceiling),
                None => (row.floor, PricingBasis::FloorNoCompetitor),
            },
            Some((offer, best_price)) if row.mode == CompareMode::HoldIfBeating && own_unit_price < best_price => {
                let note = format!(
                    "{}: Price already beats competitor, no update needed! Current={:.2}, Competitor={:.2} ({})",
                    timestamp, own_unit_price, best_price, offer.seller
                );
                return PricingDecision {
                    target: None,
                    basis: PricingBasis::AlreadyBeating {
                        seller: offer.seller.clone(),
                        unit_price: best_price,
                    },
                    note,
                    update: None,
                    customer_pay: None,
                    floor: row.floor,
                    ceiling: row.ceiling,
                    best: Some(offer.clone()),
                    own_unit_price,
                };
            }
            Some((offer, best_price)) => {
                let band = row.jitter.normalized();
                let low = row.floor.max(best_price - band.delta_max);
                let high = row.floor.max(best_price - band.delta_min);
                let picked = if high > low { rng.random_range(low..=high) } else { low };
                (
                    picked,
                    PricingBasis::Undercut {
                        seller: offer.seller.clone(),
                        unit_price: best_price,
                    },
                )
            }
        };

        let target = clamp(round_to(raw_target, row.jitter.precision), row.floor, row.ceiling);
        let customer_pay = customer_pay_for_order(api_unit_price(target, row.unit_stock), row.order_quantity());
        let price_iwtr = customer_pay.to_iwtr(&own.commission_rule);

        let mut note = format!(
            "{}: Price updated; PriceCustomerPay: {}; PriceIWTR = {}; Unit Price: {}; Stock = {}; Unit Stock = {}; \
             MinUnitPerOrder = {}; UnitPriceMin = {}, UnitPriceMax = {}",
            timestamp,
            customer_pay,
            price_iwtr,
            target,
            row.stock,
            row.unit_stock,
            Maybe(row.min_units_per_order),
            row.floor,
            Maybe(row.ceiling),
        );
        if let Some((offer, best_price)) = best {
            let seller_iwtr = CustomerPay(offer.price).to_iwtr(&own.commission_rule);
            note.push_str(&format!(
                " - Seller: {}, SellerPriceIWTR: {}, SellerUnitPrice: {}",
                offer.seller, seller_iwtr, best_price
            ));
        }

        PricingDecision {
            target: Some(target),
            basis,
            note,
            update: Some(OfferUpdate {
                offer_id: own.id.clone(),
                price: price_iwtr,
                declared_stock: row.declared_stock(),
                min_quantity: row.min_quantity(),
            }),
            customer_pay: Some(customer_pay),
            floor: row.floor,
            ceiling: row.ceiling,
            best: best.map(|(offer, _)| offer.clone()),
            own_unit_price,
        }
    }
}

fn clamp(value: f64, floor: f64, ceiling: Option<f64>) -> f64 {
    let capped = match ceiling {
        Some(ceiling) => value.min(ceiling),
        None => value,
    };
    capped.max(floor)
}

/// Displays `None` as "None"
struct Maybe<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Maybe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => write!(f, "{}", value),
            None => write!(f, "None"),
        }
    }
}
