//! Price units and commission algebra
//!
//! The marketplace works in minor units (cents). Three price views matter:
//!
//! - customer pay: what the buyer is charged for one order
//! - IWTR ("I want to receive"): what the seller gets after commission
//! - comparable unit price: real currency per table unit, scaled by the
//!   row's unit stock, which is what floors, ceilings and competitor
//!   prices are compared in
//!
//! All rounding is half away from zero.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minor units per major currency unit
pub const MINOR_PER_MAJOR: f64 = 100.0;

/// Commission charged by the marketplace on top of the seller price
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rule_name: String,
    /// Flat fee in minor units
    pub fixed_amount: i64,
    /// Percentage fee
    pub percent_value: i64,
}

impl CommissionRule {
    pub fn new(fixed_amount: i64, percent_value: i64) -> Self {
        Self {
            fixed_amount,
            percent_value,
            ..Self::default()
        }
    }
}

/// Price the customer pays for one order, in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerPay(pub i64);

/// Price the seller receives for one order, in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceIwtr(pub i64);

impl CustomerPay {
    /// `round((pay - fixed) * 100 / (100 + percent))`
    pub fn to_iwtr(self, rule: &CommissionRule) -> PriceIwtr {
        let divisor = (100 + rule.percent_value) as f64;
        let iwtr = (self.0 - rule.fixed_amount) as f64 * 100.0 / divisor;
        PriceIwtr(iwtr.round() as i64)
    }

    pub fn to_real(self) -> f64 {
        minor_to_real(self.0)
    }
}

impl PriceIwtr {
    /// `round(iwtr * (100 + percent) / 100 + fixed)`
    pub fn to_customer_pay(self, rule: &CommissionRule) -> CustomerPay {
        let pay = self.0 as f64 * (100 + rule.percent_value) as f64 / 100.0 + rule.fixed_amount as f64;
        CustomerPay(pay.round() as i64)
    }

    pub fn to_real(self) -> f64 {
        minor_to_real(self.0)
    }
}

impl fmt::Display for CustomerPay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_real())
    }
}

impl fmt::Display for PriceIwtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_real())
    }
}

pub fn minor_to_real(minor: i64) -> f64 {
    minor as f64 / MINOR_PER_MAJOR
}

/// Round `value` to `precision` decimal places, half away from zero
pub fn round_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    // A few ulps of nudge so 2.675 rounds like the decimal it was typed as
    let nudged = scaled + scaled.signum() * f64::EPSILON * scaled.abs().max(1.0) * 4.0;
    nudged.round() / factor
}

/// Marketplace unit price (minor units) to comparable unit price
pub fn comparable_unit_price(api_unit_price: f64, unit_stock: u32) -> f64 {
    api_unit_price / MINOR_PER_MAJOR * unit_stock as f64
}

/// Comparable unit price back to marketplace unit price (minor units)
pub fn api_unit_price(comparable: f64, unit_stock: u32) -> f64 {
    comparable / unit_stock.max(1) as f64 * MINOR_PER_MAJOR
}

/// Customer pay for an order of `quantity` marketplace units
pub fn customer_pay_for_order(api_unit_price: f64, quantity: u32) -> CustomerPay {
    CustomerPay((api_unit_price * quantity.max(1) as f64).round() as i64)
}
