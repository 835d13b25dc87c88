//! Per-orchard harvest settings model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pay and target configuration for one orchard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSettings {
    /// Orchard these settings apply to
    pub orchard_id: String,
    /// Pay per bucket
    pub piece_rate: f64,
    /// Legal minimum hourly wage
    pub min_wage_rate: f64,
    /// Buckets per hour needed for piece earnings to reach minimum wage
    pub min_buckets_per_hour: f64,
    /// Season target in tonnes
    pub target_tons: f64,
    /// Fruit variety being picked
    pub variety: String,
    /// Last server-side modification (Unix ms), compared before every update
    pub updated_at: i64,
}

impl HarvestSettings {
    /// Default settings for an orchard that has never been configured
    #[must_use]
    pub fn for_orchard(orchard_id: impl Into<String>) -> Self {
        Self {
            orchard_id: orchard_id.into(),
            ..Self::default()
        }
    }

    /// Reject rates that would make the pay arithmetic meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.orchard_id.trim().is_empty() {
            return Err(Error::InvalidInput("orchard_id cannot be empty".to_string()));
        }
        if !self.piece_rate.is_finite() || self.piece_rate < 0.0 {
            return Err(Error::InvalidInput(
                "piece_rate must be a non-negative amount".to_string(),
            ));
        }
        if !self.min_wage_rate.is_finite() || self.min_wage_rate < 0.0 {
            return Err(Error::InvalidInput(
                "min_wage_rate must be a non-negative amount".to_string(),
            ));
        }
        if !self.min_buckets_per_hour.is_finite() || self.min_buckets_per_hour < 0.0 {
            return Err(Error::InvalidInput(
                "min_buckets_per_hour must be non-negative".to_string(),
            ));
        }
        if !self.target_tons.is_finite() || self.target_tons < 0.0 {
            return Err(Error::InvalidInput(
                "target_tons must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Bucket rate at which piece earnings exactly meet the minimum wage.
    #[must_use]
    pub fn break_even_buckets_per_hour(&self) -> f64 {
        if self.piece_rate > 0.0 {
            self.min_wage_rate / self.piece_rate
        } else {
            f64::INFINITY
        }
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            orchard_id: String::new(),
            piece_rate: 6.50,
            min_wage_rate: 23.50,
            min_buckets_per_hour: 3.6,
            target_tons: 40.0,
            variety: "Cherry".to_string(),
            updated_at: 0,
        }
    }
}
