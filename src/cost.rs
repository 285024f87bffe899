use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::models::ProviderId;

/// One billable provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaidCall {
    pub id: Uuid,
    pub plate: String,
    pub provider: ProviderId,
    pub at: DateTime<Utc>,
}

/// Ledger of every paid provider call made by this process.
///
/// Only confirmed successes are recorded. A request that timed out may still
/// have been billed upstream and is not counted here.
#[derive(Debug, Default)]
pub struct CostAccountant {
    events: Mutex<Vec<PaidCall>>,
}

impl CostAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    fn events_guard(&self) -> MutexGuard<'_, Vec<PaidCall>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a paid call and returns the stored event.
    pub fn record(&self, plate: &str, provider: ProviderId) -> PaidCall {
        let event = PaidCall {
            id: Uuid::new_v4(),
            plate: plate.to_string(),
            provider,
            at: Utc::now(),
        };
        tracing::info!(
            paid_call = %event.id,
            plate = %event.plate,
            provider = %event.provider,
            "Paid provider call recorded"
        );
        self.events_guard().push(event.clone());
        event
    }

    pub fn total(&self) -> usize {
        self.events_guard().len()
    }

    pub fn for_plate(&self, plate: &str) -> usize {
        self.events_guard().iter().filter(|e| e.plate == plate).count()
    }

    pub fn by_provider(&self, provider: ProviderId) -> usize {
        self.events_guard()
            .iter()
            .filter(|e| e.provider == provider)
            .count()
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<PaidCall> {
        self.events_guard().clone()
    }
}
