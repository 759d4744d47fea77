//! Yearly population targets and ground-area budgets.
//!
//! The plan is computed once before the annual loop from two historical
//! reference years and the selected [`Scenario`]; the driver never revises it.

use crate::config::Scenario;
use crate::constants::REDUCING_FLOOR_SHARE;
use crate::error::{Result, UrbaSimError};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub year: i32,
    pub population: f64,
    /// Artificialized ground (m²) in that year.
    pub ground_area: f64,
}

/// The two reference years: earliest and latest of the history table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct History {
    pub first: HistoryPoint,
    pub last: HistoryPoint,
}

impl History {
    pub fn from_points(points: &[HistoryPoint]) -> Result<Self> {
        let first = points.iter().min_by_key(|p| p.year);
        let last = points.iter().max_by_key(|p| p.year);
        match (first, last) {
            (Some(&first), Some(&last)) if first.year < last.year => {
                for p in [first, last] {
                    if p.population <= 0.0 || p.ground_area < 0.0 {
                        return Err(UrbaSimError::Config(format!(
                            "history year {} needs a positive population and non-negative ground area",
                            p.year
                        )));
                    }
                }
                Ok(Self { first, last })
            }
            _ => Err(UrbaSimError::History(points.len())),
        }
    }

    fn span(&self) -> f64 {
        f64::from(self.last.year - self.first.year)
    }

    /// Annual compound population growth between the reference years.
    pub fn growth_rate(&self) -> f64 {
        (self.last.population / self.first.population).powf(1.0 / self.span()) - 1.0
    }

    /// Ground area per inhabitant in the latest reference year.
    pub fn consumption(&self) -> f64 {
        self.last.ground_area / self.last.population
    }

    /// Annual compound change of per-capita ground consumption.
    pub fn consumption_trend(&self) -> f64 {
        let start = self.first.ground_area / self.first.population;
        if start <= 0.0 {
            return 0.0;
        }
        (self.consumption() / start).powf(1.0 / self.span()) - 1.0
    }
}

/// Target of one simulated year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct YearBudget {
    pub population: u32,
    /// Maximum ground area (m²) to consume.
    pub area: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetPlan {
    pub scenario: String,
    pub growth_rate: f64,
    pub consumption_trend: f64,
    pub years: BTreeMap<i32, YearBudget>,
}

impl BudgetPlan {
    pub fn first_year(&self) -> Option<i32> {
        self.years.keys().next().copied()
    }

    pub fn final_year(&self) -> Option<i32> {
        self.years.keys().next_back().copied()
    }

    pub fn total_population(&self) -> u64 {
        self.years.values().map(|b| u64::from(b.population)).sum()
    }

    pub fn total_area(&self) -> u64 {
        self.years.values().map(|b| u64::from(b.area)).sum()
    }
}

/// Builds the year → budget mapping for `last reference year + 1 ..= final_year`.
pub fn plan(
    history: &History,
    scenario: Scenario,
    growth_override: Option<f64>,
    max_growth_rate: f64,
    final_year: i32,
) -> Result<BudgetPlan> {
    let base_year = history.last.year;
    if final_year <= base_year {
        return Err(UrbaSimError::Config(format!(
            "final year {} must come after the last reference year {}",
            final_year, base_year
        )));
    }

    let rate = growth_override.unwrap_or_else(|| history.growth_rate());
    if rate > max_growth_rate {
        return Err(UrbaSimError::GrowthRateTooHigh {
            rate,
            ceiling: max_growth_rate,
        });
    }

    let trend = history.consumption_trend();
    let start = history.consumption();
    let first_year = base_year + 1;
    let steps = f64::from(final_year - first_year);
    let population_at = |year: i32| {
        (history.last.population * (1.0 + rate).powi(year - base_year)).round()
    };

    let years = (first_year..=final_year)
        .map(|year| {
            let increment = (population_at(year) - population_at(year - 1)).max(0.0);
            let per_capita = match scenario {
                Scenario::Trend => start * (1.0 + trend).powi(year - base_year),
                Scenario::Stable => start,
                Scenario::Reducing if steps > 0.0 => {
                    let progress = f64::from(year - first_year) / steps;
                    start * (1.0 - (1.0 - REDUCING_FLOOR_SHARE) * progress)
                }
                Scenario::Reducing => start,
            };
            let budget = YearBudget {
                population: to_u32(increment),
                area: to_u32((per_capita * increment).round()),
            };
            (year, budget)
        })
        .collect();

    Ok(BudgetPlan {
        scenario: scenario.to_string(),
        growth_rate: rate,
        consumption_trend: trend,
        years,
    })
}

fn to_u32(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> History {
        History::from_points(&[
            HistoryPoint {
                year: 2010,
                population: 10_000.0,
                ground_area: 1_000_000.0,
            },
            HistoryPoint {
                year: 2015,
                population: 10_510.0,
                ground_area: 1_155_000.0,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_history_needs_two_years() {
        let p = HistoryPoint {
            year: 2015,
            population: 1.0,
            ground_area: 1.0,
        };
        assert!(matches!(
            History::from_points(&[p]),
            Err(UrbaSimError::History(1))
        ));
        assert!(History::from_points(&[p, p]).is_err());
    }

    #[test]
    fn test_growth_rate() {
        let h = history();
        let expected = (10_510.0f64 / 10_000.0).powf(0.2) - 1.0;
        assert!((h.growth_rate() - expected).abs() < 1e-12);
        assert!(h.consumption_trend() > 0.0);
    }

    #[test]
    fn test_stable_plan_matches_population_path() {
        let h = history();
        let plan = plan(&h, Scenario::Stable, Some(0.01), 0.03, 2020).unwrap();
        assert_eq!(plan.first_year(), Some(2016));
        assert_eq!(plan.final_year(), Some(2020));

        let expected_total = (10_510.0f64 * 1.01f64.powi(5)).round() - 10_510.0;
        assert_eq!(plan.total_population(), expected_total as u64);

        let per_capita = h.consumption();
        for budget in plan.years.values() {
            let expected = (per_capita * f64::from(budget.population)).round() as u32;
            assert_eq!(budget.area, expected);
        }
    }

    #[test]
    fn test_reducing_reaches_quarter() {
        let h = history();
        let stable = plan(&h, Scenario::Stable, Some(0.01), 0.03, 2025).unwrap();
        let reducing = plan(&h, Scenario::Reducing, Some(0.01), 0.03, 2025).unwrap();
        let first = reducing.years[&2016];
        let last = reducing.years[&2025];
        assert_eq!(first, stable.years[&2016]);

        let per_capita_last = f64::from(last.area) / f64::from(last.population);
        assert!((per_capita_last - 0.25 * h.consumption()).abs() < 1.0);
    }

    #[test]
    fn test_trend_compounds() {
        let h = history();
        let trend = plan(&h, Scenario::Trend, Some(0.01), 0.03, 2030).unwrap();
        let stable = plan(&h, Scenario::Stable, Some(0.01), 0.03, 2030).unwrap();
        assert!(trend.total_area() > stable.total_area());
    }

    #[test]
    fn test_plan_is_pure() {
        let h = history();
        let a = plan(&h, Scenario::Trend, None, 0.03, 2040).unwrap();
        let b = plan(&h, Scenario::Trend, None, 0.03, 2040).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_rejects_bad_inputs() {
        let h = history();
        assert!(matches!(
            plan(&h, Scenario::Stable, Some(0.08), 0.03, 2030),
            Err(UrbaSimError::GrowthRateTooHigh { .. })
        ));
        assert!(plan(&h, Scenario::Stable, None, 0.03, 2015).is_err());
    }

    #[test]
    fn test_declining_population_has_no_targets() {
        let h = history();
        let plan = plan(&h, Scenario::Stable, Some(-0.01), 0.03, 2020).unwrap();
        assert_eq!(plan.total_population(), 0);
        assert_eq!(plan.total_area(), 0);
    }
}
