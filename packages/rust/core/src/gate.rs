//! Admission ceiling for in-flight records.
//!
//! A record holds an [`Admission`] from just before its download starts until
//! its blocks have been extracted. One gate is created per batch and handed to
//! every worker of that batch. Closing the gate turns away every record that
//! has not been admitted yet, while admitted ones run to completion.

use std::sync::atomic::{AtomicUsize, Ordering};

use affilscan_shared::{AffilscanError, Result};
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug)]
pub struct AdmissionGate {
    permits: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. Fails with [`AffilscanError::Halted`] once the
    /// gate is closed, including for callers already waiting.
    pub async fn admit(&self) -> Result<Admission<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AffilscanError::Halted)?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Admission {
            gate: self,
            _permit: permit,
        })
    }

    /// Refuse all further admissions.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct Admission<'a> {
    gate: &'a AdmissionGate,
    _permit: SemaphorePermit<'a>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
