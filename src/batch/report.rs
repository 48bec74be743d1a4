//! Batch results.

use crate::types::{Failure, GeneratedValue, Outcome};
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Successes served from the cache.
    pub cache_hits: usize,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

/// One outcome per submitted request, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub outcomes: Vec<Outcome>,
    pub summary: BatchSummary,
    /// The run's cancellation signal fired.
    pub canceled: bool,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_success)
    }

    pub fn successes(&self) -> impl Iterator<Item = (usize, &GeneratedValue)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.value().map(|v| (i, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &Failure)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.failure().map(|f| (i, f)))
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    /// The outcomes, or `Error::Runtime` if the run was canceled.
    pub fn into_result(self) -> Result<Vec<Outcome>> {
        if self.canceled {
            return Err(Error::runtime_with_context(
                "batch canceled",
                ErrorContext::new()
                    .with_details(format!(
                        "{} of {} requests canceled",
                        self.summary.canceled, self.summary.total
                    ))
                    .with_source(self.run_id.to_string()),
            ));
        }
        Ok(self.outcomes)
    }
}

impl IntoIterator for BatchReport {
    type Item = Outcome;
    type IntoIter = std::vec::IntoIter<Outcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
