//! Admission gate bounding in-flight requests.

use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InflightSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// Counting gate with FIFO admission. Waiters are admitted in the order they arrived.
#[derive(Debug)]
pub struct AdmissionGate {
    permits: Semaphore,
    max: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Semaphore::new(max),
            max,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot. The slot is released when the returned [`Admission`] drops.
    pub async fn admit(&self) -> Result<Admission<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::runtime("admission gate closed"))?;
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(Admission {
            _permit: permit,
            gate: self,
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Highest number of simultaneous admissions seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> InflightSnapshot {
        let available = self.permits.available_permits();
        InflightSnapshot {
            max: self.max,
            available,
            in_use: self.max.saturating_sub(available),
        }
    }
}

/// A held slot.
#[derive(Debug)]
pub struct Admission<'a> {
    _permit: SemaphorePermit<'a>,
    gate: &'a AdmissionGate,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
