//! Nightly/monthly rate reconciliation
//!
//! The search service quotes nightly rates for short stays and monthly rates
//! for long ones without reliably saying which. When the query ceiling looks
//! like a monthly budget, nightly quotes are scaled up to a month before
//! being compared against it.

use crate::config::RatesConfig;
use crate::models::{PriceQuote, RateQualifier};

/// Outcome of checking one quote against the query ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Keep the candidate; carries the monthly estimate when one was computed
    Accept { monthly_estimate: Option<f64> },
    Reject { monthly_estimate: f64, ceiling: u32 },
}

impl Verdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Reject { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RatePolicy {
    monthly_budget_threshold: f64,
    nights_per_month: f64,
}

impl RatePolicy {
    pub fn new(monthly_budget_threshold: f64, nights_per_month: f64) -> Self {
        Self {
            monthly_budget_threshold,
            nights_per_month,
        }
    }

    pub fn reconcile(&self, ceiling: Option<u32>, quote: Option<&PriceQuote>) -> Verdict {
        let Some(ceiling) = ceiling else {
            return Verdict::Accept { monthly_estimate: None };
        };
        if f64::from(ceiling) <= self.monthly_budget_threshold {
            return Verdict::Accept { monthly_estimate: None };
        }

        let Some(quote) = quote else {
            return Verdict::Accept { monthly_estimate: None };
        };
        if quote.qualifier == Some(RateQualifier::Month) {
            return Verdict::Accept { monthly_estimate: None };
        }

        // listings that need dates before showing a rate count as zero
        let amount = quote.amount.unwrap_or(0.0);
        let monthly_estimate = amount * self.nights_per_month;

        if monthly_estimate > f64::from(ceiling) {
            Verdict::Reject {
                monthly_estimate,
                ceiling,
            }
        } else {
            Verdict::Accept {
                monthly_estimate: Some(monthly_estimate),
            }
        }
    }
}

impl From<&RatesConfig> for RatePolicy {
    fn from(config: &RatesConfig) -> Self {
        Self::new(config.monthly_budget_threshold, config.nights_per_month)
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::from(&RatesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nightly(amount: f64) -> PriceQuote {
        PriceQuote::new(amount, RateQualifier::Night)
    }

    #[test]
    fn nightly_quote_over_monthly_budget_is_rejected() {
        let policy = RatePolicy::new(1000.0, 28.0);
        let verdict = policy.reconcile(Some(2000), Some(&nightly(80.0)));

        assert_eq!(
            verdict,
            Verdict::Reject {
                monthly_estimate: 2240.0,
                ceiling: 2000
            }
        );
    }

    #[test]
    fn nightly_quote_within_monthly_budget_is_accepted() {
        let policy = RatePolicy::new(1000.0, 28.0);
        let verdict = policy.reconcile(Some(3000), Some(&nightly(80.0)));

        assert_eq!(
            verdict,
            Verdict::Accept {
                monthly_estimate: Some(2240.0)
            }
        );
    }

    #[test]
    fn monthly_quotes_are_left_alone() {
        let policy = RatePolicy::default();
        let quote = PriceQuote::new(2500.0, RateQualifier::Month);
        assert!(!policy.reconcile(Some(2000), Some(&quote)).is_rejected());
    }

    #[test]
    fn small_ceilings_are_nightly_budgets() {
        let policy = RatePolicy::default();
        let verdict = policy.reconcile(Some(1000), Some(&nightly(900.0)));
        assert_eq!(verdict, Verdict::Accept { monthly_estimate: None });
    }

    #[test]
    fn no_ceiling_accepts_everything() {
        let policy = RatePolicy::default();
        assert!(!policy.reconcile(None, Some(&nightly(10_000.0))).is_rejected());
    }

    #[test]
    fn missing_amount_is_accepted() {
        let policy = RatePolicy::default();
        let quote = PriceQuote {
            amount: None,
            qualifier: Some(RateQualifier::Night),
            total: None,
        };
        assert!(!policy.reconcile(Some(2000), Some(&quote)).is_rejected());
    }

    #[test]
    fn threshold_and_multiplier_are_configurable() {
        let policy = RatePolicy::new(500.0, 30.0);
        assert!(policy.reconcile(Some(900), Some(&nightly(31.0))).is_rejected());
        assert!(!policy.reconcile(Some(900), Some(&nightly(30.0))).is_rejected());
    }
}
