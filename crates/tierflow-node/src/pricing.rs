//! # Pricing Adapter
//!
//! Converts payments in volatile assets into quote-currency value.
//!
//! The oracle is only trusted through three guards:
//!
//! | Guard | Failure |
//! |-------|---------|
//! | call timeout | fall back to cached quote |
//! | quote age ≤ `max_price_age_secs` | fall back to cached quote |
//! | jump vs last known good ≤ `max_deviation_bps` | `OracleDeviation` |
//!
//! With no fresh quote and no fresh cached quote the payment is rejected with
//! `OracleStale` rather than mis-priced.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tierflow_core::{
    Amount, CompensationError, Payment, PaymentAsset, Result, Timestamp, BPS_DENOMINATOR,
};

use crate::config::PricingConfig;

/// Oracle answer for one asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Micro-units of quote currency per whole asset unit
    pub price: Amount,
    /// When the oracle observed the price
    pub timestamp: Timestamp,
}

/// Read interface of an external price feed
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, asset: &str) -> Result<PriceQuote>;
}

/// In-process oracle with manually set prices
#[derive(Default)]
pub struct FixedPriceOracle {
    quotes: RwLock<HashMap<String, PriceQuote>>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, asset: &str, price: Amount, timestamp: Timestamp) {
        self.quotes
            .write()
            .insert(asset.to_ascii_uppercase(), PriceQuote { price, timestamp });
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn get_price(&self, asset: &str) -> Result<PriceQuote> {
        self.quotes
            .read()
            .get(&asset.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| CompensationError::OracleStale(format!("no feed for {}", asset)))
    }
}

/// Guarded access to a [`PriceOracle`] with a last-known-good cache
pub struct PricingAdapter {
    oracle: Arc<dyn PriceOracle>,
    config: PricingConfig,
    last_good: RwLock<HashMap<String, PriceQuote>>,
}

impl PricingAdapter {
    pub fn new(oracle: Arc<dyn PriceOracle>, config: PricingConfig) -> Self {
        Self {
            oracle,
            config,
            last_good: RwLock::new(HashMap::new()),
        }
    }

    /// Current price of `asset`, or a still-fresh cached one
    pub async fn quote(&self, asset: &str, now: Timestamp) -> Result<PriceQuote> {
        let key = asset.to_ascii_uppercase();
        let fetched = tokio::time::timeout(self.config.timeout(), self.oracle.get_price(&key)).await;
        let cached = self.last_good.read().get(&key).copied();

        match fetched {
            Ok(Ok(quote)) if self.is_fresh(&quote, now) => {
                if let Some(last) = cached.filter(|q| self.is_fresh(q, now)) {
                    let deviation = deviation_bps(last.price, quote.price);
                    if deviation > self.config.max_deviation_bps as u128 {
                        tracing::warn!(
                            asset = %key,
                            last = last.price,
                            price = quote.price,
                            deviation,
                            "Oracle price deviation too large"
                        );
                        return Err(CompensationError::OracleDeviation {
                            asset: key,
                            deviation_bps: deviation,
                        });
                    }
                }
                self.last_good.write().insert(key, quote);
                Ok(quote)
            }
            Ok(Ok(quote)) => {
                tracing::warn!(asset = %key, age = now - quote.timestamp, "Oracle returned stale price");
                self.fallback(key, cached, now)
            }
            Ok(Err(e)) => {
                tracing::warn!(asset = %key, error = %e, "Oracle call failed");
                self.fallback(key, cached, now)
            }
            Err(_) => {
                tracing::warn!(asset = %key, timeout_ms = self.config.timeout_ms, "Oracle call timed out");
                self.fallback(key, cached, now)
            }
        }
    }

    /// Check a payment against a quote-currency price
    ///
    /// Stable payments must match exactly; volatile payments must be valued
    /// within `payment_tolerance_bps` of the price. Returns the amount
    /// credited, which is always the price.
    pub async fn verify_payment(&self, payment: &Payment, price: Amount, now: Timestamp) -> Result<Amount> {
        match &payment.asset {
            PaymentAsset::Stable => {
                if payment.amount != price {
                    return Err(CompensationError::PaymentMismatch {
                        expected: price,
                        received: payment.amount,
                    });
                }
            }
            PaymentAsset::Volatile { symbol, decimals } => {
                let quote = self.quote(symbol, now).await?;
                let unit = 10u128.checked_pow(*decimals as u32).ok_or_else(|| {
                    CompensationError::InvalidInput(format!("{} decimals for {}", decimals, symbol))
                })?;
                let value = payment
                    .amount
                    .checked_mul(quote.price)
                    .map(|v| v / unit)
                    .ok_or_else(|| CompensationError::InvalidInput("payment value overflow".into()))?;

                let tolerance = price * self.config.payment_tolerance_bps as u128 / BPS_DENOMINATOR;
                if value.abs_diff(price) > tolerance {
                    return Err(CompensationError::PaymentMismatch {
                        expected: price,
                        received: value,
                    });
                }
                tracing::debug!(asset = %symbol, value, price, "Volatile payment accepted");
            }
        }
        Ok(price)
    }

    fn is_fresh(&self, quote: &PriceQuote, now: Timestamp) -> bool {
        now.saturating_sub(quote.timestamp) <= self.config.max_price_age_secs
    }

    fn fallback(&self, asset: String, cached: Option<PriceQuote>, now: Timestamp) -> Result<PriceQuote> {
        match cached.filter(|q| self.is_fresh(q, now)) {
            Some(quote) => {
                tracing::info!(asset = %asset, price = quote.price, "Using last known good price");
                Ok(quote)
            }
            None => Err(CompensationError::OracleStale(asset)),
        }
    }
}

/// Relative change from `reference` to `price` in basis points
fn deviation_bps(reference: Amount, price: Amount) -> u128 {
    if reference == 0 {
        return if price == 0 { 0 } else { u128::MAX };
    }
    reference.abs_diff(price) * BPS_DENOMINATOR / reference
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tierflow_core::usd;

    /// Oracle that never answers in time
    struct SlowOracle;

    #[async_trait]
    impl PriceOracle for SlowOracle {
        async fn get_price(&self, _asset: &str) -> Result<PriceQuote> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PriceQuote { price: 1, timestamp: 0 })
        }
    }

    fn adapter(oracle: Arc<dyn PriceOracle>) -> PricingAdapter {
        PricingAdapter::new(oracle, PricingConfig::default())
    }

    #[test]
    fn test_deviation_bps() {
        assert_eq!(deviation_bps(usd(100), usd(110)), 1_000);
        assert_eq!(deviation_bps(usd(100), usd(95)), 500);
        assert_eq!(deviation_bps(0, 0), 0);
    }

    #[tokio::test]
    async fn test_stable_payment_must_match() {
        let pricing = adapter(Arc::new(FixedPriceOracle::new()));
        assert_eq!(pricing.verify_payment(&Payment::stable(usd(30)), usd(30), 0).await, Ok(usd(30)));
        assert_eq!(
            pricing.verify_payment(&Payment::stable(usd(29)), usd(30), 0).await,
            Err(CompensationError::PaymentMismatch {
                expected: usd(30),
                received: usd(29)
            })
        );
    }

    #[tokio::test]
    async fn test_volatile_payment_within_tolerance() {
        let oracle = Arc::new(FixedPriceOracle::new());
        oracle.set_price("BNB", usd(600), 1_000);
        let pricing = adapter(oracle);

        // 0.05 BNB at $600 = $30
        let exact = Payment::volatile("BNB", 18, 50_000_000_000_000_000);
        assert_eq!(pricing.verify_payment(&exact, usd(30), 1_010).await, Ok(usd(30)));

        // 0.0499 BNB = $29.94, inside the 1% tolerance
        let close = Payment::volatile("bnb", 18, 49_900_000_000_000_000);
        assert!(pricing.verify_payment(&close, usd(30), 1_010).await.is_ok());

        // 0.04 BNB = $24
        let short = Payment::volatile("BNB", 18, 40_000_000_000_000_000);
        assert!(matches!(
            pricing.verify_payment(&short, usd(30), 1_010).await,
            Err(CompensationError::PaymentMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_quote_rejected_without_cache() {
        let oracle = Arc::new(FixedPriceOracle::new());
        oracle.set_price("BNB", usd(600), 0);
        let pricing = adapter(oracle);
        assert_eq!(
            pricing.quote("BNB", 10_000).await,
            Err(CompensationError::OracleStale("BNB".into()))
        );
    }

    #[tokio::test]
    async fn test_stale_quote_falls_back_to_fresh_cache() {
        let oracle = Arc::new(FixedPriceOracle::new());
        oracle.set_price("BNB", usd(600), 1_000);
        let pricing = adapter(oracle.clone());
        pricing.quote("BNB", 1_000).await.unwrap();

        // Feed stops updating; cached quote is still within max age
        let quote = pricing.quote("BNB", 1_200).await.unwrap();
        assert_eq!(quote.price, usd(600));

        // Past max age nothing is usable
        assert!(matches!(
            pricing.quote("BNB", 1_400).await,
            Err(CompensationError::OracleStale(_))
        ));
    }

    #[tokio::test]
    async fn test_deviation_breach_rejected() {
        let oracle = Arc::new(FixedPriceOracle::new());
        oracle.set_price("BNB", usd(600), 1_000);
        let pricing = adapter(oracle.clone());
        pricing.quote("BNB", 1_000).await.unwrap();

        oracle.set_price("BNB", usd(700), 1_050);
        assert!(matches!(
            pricing.quote("BNB", 1_050).await,
            Err(CompensationError::OracleDeviation { .. })
        ));

        // Small move is accepted and becomes the new reference
        oracle.set_price("BNB", usd(630), 1_060);
        assert_eq!(pricing.quote("BNB", 1_060).await.unwrap().price, usd(630));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_cache_is_stale() {
        let pricing = adapter(Arc::new(SlowOracle));
        assert_eq!(
            pricing.quote("ETH", 0).await,
            Err(CompensationError::OracleStale("ETH".into()))
        );
    }
}
