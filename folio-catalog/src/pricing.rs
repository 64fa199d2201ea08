use serde::{Deserialize, Serialize};

/// Monetary breakdown of an order, all in minor units of the base currency.
///
/// The only way to build one is through [`PriceBreakdown::from_prices`], which keeps
/// `total == subtotal - discount + tax` true for every value that exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceBreakdown {
    subtotal: i64,
    discount: i64,
    tax: i64,
    total: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Price must not be negative: {0}")]
    NegativeAmount(i64),

    #[error("Discount {discount} exceeds subtotal {subtotal}")]
    DiscountExceedsSubtotal { discount: i64, subtotal: i64 },

    #[error("Order amount overflows")]
    Overflow,
}

impl PriceBreakdown {
    /// Sum item prices and apply a flat discount and tax.
    pub fn from_prices<I>(prices: I, discount: i64, tax: i64) -> Result<Self, PricingError>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut subtotal: i64 = 0;
        for price in prices {
            if price < 0 {
                return Err(PricingError::NegativeAmount(price));
            }
            subtotal = subtotal.checked_add(price).ok_or(PricingError::Overflow)?;
        }

        if discount < 0 {
            return Err(PricingError::NegativeAmount(discount));
        }
        if tax < 0 {
            return Err(PricingError::NegativeAmount(tax));
        }
        if discount > subtotal {
            return Err(PricingError::DiscountExceedsSubtotal { discount, subtotal });
        }

        let total = (subtotal - discount)
            .checked_add(tax)
            .ok_or(PricingError::Overflow)?;

        Ok(Self { subtotal, discount, tax, total })
    }

    pub fn subtotal(&self) -> i64 {
        self.subtotal
    }

    pub fn discount(&self) -> i64 {
        self.discount
    }

    pub fn tax(&self) -> i64 {
        self.tax
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}
