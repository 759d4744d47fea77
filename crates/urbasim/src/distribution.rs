//! Per-district empirical tables: floor count and footprint distributions,
//! floor-area norms.

use crate::error::{Result, UrbaSimError};
use std::collections::HashMap;

/// Discrete distribution as an ordered `(value, weight)` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    entries: Vec<(u32, f64)>,
}

impl Distribution {
    /// Builds a table sorted by value; duplicated values have their weights summed.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        let mut entries: Vec<(u32, f64)> = Vec::new();
        let mut sorted: Vec<(u32, f64)> = pairs.into_iter().collect();
        sorted.sort_by_key(|&(value, _)| value);
        for (value, weight) in sorted {
            match entries.last_mut() {
                Some(last) if last.0 == value => last.1 += weight,
                _ => entries.push((value, weight)),
            }
        }
        Self { entries }
    }

    /// Single value with weight 1.
    pub fn constant(value: u32) -> Self {
        Self {
            entries: vec![(value, 1.0)],
        }
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    pub fn total_weight(&self) -> f64 {
        self.entries.iter().map(|&(_, w)| w).sum()
    }

    /// Empty or zero-sum tables cannot be drawn from.
    pub fn is_degenerate(&self) -> bool {
        self.total_weight() <= 0.0
    }

    /// Largest value carrying a positive weight.
    pub fn max_value(&self) -> Option<u32> {
        self.entries
            .iter()
            .rev()
            .find(|&&(_, w)| w > 0.0)
            .map(|&(v, _)| v)
    }

    fn push(&mut self, value: u32, weight: f64) {
        match self.entries.binary_search_by_key(&value, |&(v, _)| v) {
            Ok(i) => self.entries[i].1 += weight,
            Err(i) => self.entries.insert(i, (value, weight)),
        }
    }
}

/// A fitted distribution and the fallback used when it is degenerate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitPair {
    pub fitted: Distribution,
    pub unfit: Distribution,
}

impl FitPair {
    pub fn active(&self) -> &Distribution {
        if self.fitted.is_degenerate() {
            &self.unfit
        } else {
            &self.fitted
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistrictDistributions {
    pub floors: FitPair,
    pub footprints: FitPair,
}

/// Which table a row of a distribution file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    Floors,
    Footprints,
}

#[derive(Debug, Clone, Default)]
pub struct DistributionTables {
    districts: HashMap<u32, DistrictDistributions>,
}

impl DistributionTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `(value, fitted weight, unfit weight)` row. Negative or
    /// non-finite weights are rejected.
    pub fn insert(
        &mut self,
        district: u32,
        kind: DistributionKind,
        value: u32,
        fitted: f64,
        unfit: f64,
    ) -> Result<()> {
        for weight in [fitted, unfit] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(UrbaSimError::Distribution {
                    district,
                    message: format!("weight {} for value {} is not a non-negative number", weight, value),
                });
            }
        }
        let entry = self.districts.entry(district).or_default();
        let pair = match kind {
            DistributionKind::Floors => &mut entry.floors,
            DistributionKind::Footprints => &mut entry.footprints,
        };
        pair.fitted.push(value, fitted);
        pair.unfit.push(value, unfit);
        Ok(())
    }

    pub fn set(&mut self, district: u32, tables: DistrictDistributions) {
        self.districts.insert(district, tables);
    }

    pub fn get(&self, district: u32) -> Option<&DistrictDistributions> {
        self.districts.get(&district)
    }

    /// Active floor-count table of a district.
    pub fn floors(&self, district: u32) -> Option<&Distribution> {
        self.get(district).map(|d| d.floors.active())
    }

    /// Active footprint table of a district.
    pub fn footprints(&self, district: u32) -> Option<&Distribution> {
        self.get(district).map(|d| d.footprints.active())
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// Districts whose floor or footprint table has neither a fitted nor a fallback weight.
    pub fn degenerate_districts(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .districts
            .iter()
            .filter(|(_, d)| d.floors.active().is_degenerate() || d.footprints.active().is_degenerate())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Floor-area norm and residential share of new ground in a district.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistrictNorm {
    pub m2_per_person: f64,
    pub residential_share: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DistrictNorms {
    norms: HashMap<u32, DistrictNorm>,
}

impl DistrictNorms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, district: u32, norm: DistrictNorm) {
        self.norms.insert(district, norm);
    }

    pub fn get(&self, district: u32) -> Option<&DistrictNorm> {
        self.norms.get(&district)
    }

    /// Floor area (m²) needed to house one person, `None` for unknown districts.
    pub fn m2_per_person(&self, district: u32) -> Option<f64> {
        self.get(district)
            .map(|n| n.m2_per_person)
            .filter(|&m2| m2 > 0.0)
    }

    /// Share of a new footprint that is residential, 1 for unknown districts.
    pub fn residential_share(&self, district: u32) -> f64 {
        self.get(district).map_or(1.0, |n| n.residential_share)
    }

    /// Caps every district's floor-area norm.
    pub fn cap_m2_per_person(&mut self, cap: f64) {
        for norm in self.norms.values_mut() {
            norm.m2_per_person = norm.m2_per_person.min(cap);
        }
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }
}
