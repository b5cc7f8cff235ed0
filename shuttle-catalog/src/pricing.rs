use serde::{Deserialize, Serialize};
use shuttle_core::{EngineError, EngineResult, PricingTier};

/// Legacy platform-wide rate for destinations without a tier table.
pub const DEFAULT_FLAT_RATE: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Per-passenger credits charged when a destination has no tiers.
    pub flat_rate_credits: i64,

    /// Refuse tier tables whose per-passenger cost rises with group size.
    pub reject_non_monotonic_tiers: bool,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            flat_rate_credits: DEFAULT_FLAT_RATE,
            reject_non_monotonic_tiers: false,
        }
    }
}

/// Which rule produced a rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateSource {
    /// A tier for exactly this passenger count.
    Exact,
    /// No exact tier; the highest-threshold tier applies.
    ClampedToMax,
    /// The destination has no tiers at all.
    FlatRate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedRate {
    pub per_passenger: i64,
    pub source: RateSource,
}

impl ResolvedRate {
    pub fn total_for(&self, passengers: u32) -> i64 {
        self.per_passenger * passengers as i64
    }
}

/// Outcome of checking a tier table before it is stored.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TierReport {
    /// `(lower, higher)` thresholds where the higher count costs more per passenger.
    pub non_monotonic_steps: Vec<(u32, u32)>,
}

impl TierReport {
    pub fn is_monotonic(&self) -> bool {
        self.non_monotonic_steps.is_empty()
    }
}

/// Maps a trip's total occupancy to the uniform per-passenger rate.
#[derive(Debug, Clone, Default)]
pub struct TierResolver {
    config: PricingConfig,
}

impl TierResolver {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    /// Resolve the rate for a trip carrying `passenger_count` passengers.
    ///
    /// `tiers` is the full table of one destination, in any order.
    pub fn resolve(&self, tiers: &[PricingTier], passenger_count: u32) -> EngineResult<ResolvedRate> {
        if passenger_count == 0 {
            return Err(EngineError::Validation(
                "Cannot price a trip without passengers".to_string(),
            ));
        }

        if tiers.is_empty() {
            return Ok(ResolvedRate {
                per_passenger: self.config.flat_rate_credits,
                source: RateSource::FlatRate,
            });
        }

        if let Some(tier) = tiers.iter().find(|t| t.passenger_count == passenger_count) {
            return Ok(ResolvedRate {
                per_passenger: tier.cost_per_passenger,
                source: RateSource::Exact,
            });
        }

        // Non-empty, so max_by_key always finds a tier
        let highest = tiers
            .iter()
            .max_by_key(|t| t.passenger_count)
            .ok_or_else(|| EngineError::Validation("Empty tier table".to_string()))?;

        Ok(ResolvedRate {
            per_passenger: highest.cost_per_passenger,
            source: RateSource::ClampedToMax,
        })
    }

    /// Validate a tier table for storage.
    ///
    /// Structural problems always fail. Rising per-passenger cost fails only
    /// when `reject_non_monotonic_tiers` is set; otherwise it is reported and logged.
    pub fn check_tiers(&self, tiers: &[PricingTier]) -> EngineResult<TierReport> {
        let mut sorted: Vec<&PricingTier> = tiers.iter().collect();
        sorted.sort_by_key(|t| t.passenger_count);

        for tier in &sorted {
            if tier.passenger_count == 0 {
                return Err(EngineError::Validation(
                    "Tier passenger count must be at least 1".to_string(),
                ));
            }
            if tier.cost_per_passenger < 0 {
                return Err(EngineError::Validation(format!(
                    "Tier for {} passengers has a negative cost",
                    tier.passenger_count
                )));
            }
        }

        let mut report = TierReport::default();
        for pair in sorted.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            if lower.passenger_count == higher.passenger_count {
                return Err(EngineError::Validation(format!(
                    "Duplicate tier for {} passengers",
                    lower.passenger_count
                )));
            }
            if higher.cost_per_passenger > lower.cost_per_passenger {
                report
                    .non_monotonic_steps
                    .push((lower.passenger_count, higher.passenger_count));
            }
        }

        if !report.is_monotonic() {
            if self.config.reject_non_monotonic_tiers {
                return Err(EngineError::Validation(format!(
                    "Per-passenger cost rises between tiers {:?}",
                    report.non_monotonic_steps
                )));
            }
            tracing::warn!(
                steps = ?report.non_monotonic_steps,
                "Accepting non-monotonic tier table; adding passengers can raise the group rate"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn table(pairs: &[(u32, i64)]) -> Vec<PricingTier> {
        let destination = Uuid::new_v4();
        pairs
            .iter()
            .map(|(count, cost)| PricingTier::new(destination, *count, *cost))
            .collect()
    }

    #[test]
    fn test_exact_match() {
        let resolver = TierResolver::default();
        let tiers = table(&[(1, 120), (2, 90), (3, 80), (4, 70)]);

        let rate = resolver.resolve(&tiers, 2).unwrap();
        assert_eq!(rate.per_passenger, 90);
        assert_eq!(rate.source, RateSource::Exact);
        assert_eq!(rate.total_for(2), 180);
    }

    #[test]
    fn test_flat_rate_without_tiers() {
        let resolver = TierResolver::default();

        let rate = resolver.resolve(&[], 5).unwrap();
        assert_eq!(rate.per_passenger, DEFAULT_FLAT_RATE);
        assert_eq!(rate.source, RateSource::FlatRate);
    }

    #[test]
    fn test_configured_flat_rate() {
        let resolver = TierResolver::new(PricingConfig {
            flat_rate_credits: 25,
            reject_non_monotonic_tiers: false,
        });

        assert_eq!(resolver.resolve(&[], 1).unwrap().per_passenger, 25);
    }

    #[test]
    fn test_clamps_to_highest_tier() {
        let resolver = TierResolver::default();
        let tiers = table(&[(3, 80), (1, 120), (4, 70), (2, 90)]);

        let rate = resolver.resolve(&tiers, 9).unwrap();
        assert_eq!(rate.per_passenger, 70);
        assert_eq!(rate.source, RateSource::ClampedToMax);
    }

    #[test]
    fn test_gap_uses_highest_tier() {
        let resolver = TierResolver::default();
        let tiers = table(&[(1, 100), (4, 60)]);

        let rate = resolver.resolve(&tiers, 2).unwrap();
        assert_eq!(rate.per_passenger, 60);
        assert_eq!(rate.source, RateSource::ClampedToMax);
    }

    #[test]
    fn test_zero_passengers_rejected() {
        let resolver = TierResolver::default();
        assert!(matches!(resolver.resolve(&[], 0), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_check_tiers_reports_non_monotonic() {
        let resolver = TierResolver::default();
        let tiers = table(&[(1, 100), (2, 110), (3, 90)]);

        let report = resolver.check_tiers(&tiers).unwrap();
        assert_eq!(report.non_monotonic_steps, vec![(1, 2)]);
    }

    #[test]
    fn test_check_tiers_rejects_when_configured() {
        let resolver = TierResolver::new(PricingConfig {
            flat_rate_credits: 1,
            reject_non_monotonic_tiers: true,
        });
        let tiers = table(&[(1, 100), (2, 110)]);

        assert!(matches!(resolver.check_tiers(&tiers), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_check_tiers_structural_errors() {
        let resolver = TierResolver::default();

        assert!(resolver.check_tiers(&table(&[(0, 10)])).is_err());
        assert!(resolver.check_tiers(&table(&[(1, -5)])).is_err());
        assert!(resolver.check_tiers(&table(&[(2, 10), (2, 9)])).is_err());
        assert!(resolver.check_tiers(&[]).unwrap().is_monotonic());
    }

    proptest! {
        #[test]
        fn resolved_rate_always_comes_from_the_table(
            costs in proptest::collection::vec(0i64..500, 1..8),
            count in 1u32..20,
        ) {
            let pairs: Vec<(u32, i64)> = costs
                .iter()
                .enumerate()
                .map(|(i, c)| (i as u32 + 1, *c))
                .collect();
            let tiers = table(&pairs);

            let rate = TierResolver::default().resolve(&tiers, count).unwrap();
            prop_assert!(costs.contains(&rate.per_passenger));
            if (count as usize) <= costs.len() {
                prop_assert_eq!(rate.per_passenger, costs[count as usize - 1]);
            } else {
                prop_assert_eq!(rate.per_passenger, *costs.last().unwrap());
            }
        }
    }
}
