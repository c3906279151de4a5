//! Interfaces to the external systems step handlers depend on.
//!
//! Implementations live outside this crate; the in-memory booking store
//! below is used by tests and the demo binary.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Network or protocol level failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// The requested resource is held by another writer
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Insurance policy identifiers of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPolicy {
    /// Payer (insurance company) identifier
    #[serde(alias = "payerId")]
    pub payer_id: String,

    /// Policy or member number
    #[serde(alias = "policyNumber")]
    pub policy_number: String,

    /// Group number, when the plan has one
    #[serde(default, alias = "groupNumber", skip_serializing_if = "Option::is_none")]
    pub group_number: Option<String>,
}

/// An open appointment slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Provider offering the slot
    pub provider_id: String,

    /// Calendar date
    pub date: NaiveDate,

    /// Start time
    pub time: NaiveTime,

    /// Length in minutes
    pub duration_minutes: u32,
}

/// Inclusive range of dates to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day
    pub start: NaiveDate,

    /// Last day
    pub end: NaiveDate,
}

/// Request to reserve a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Provider to book with
    pub provider_id: String,

    /// Calendar date
    pub date: NaiveDate,

    /// Start time
    pub time: NaiveTime,

    /// Length in minutes
    pub duration_minutes: u32,

    /// Subject the booking is for
    pub subject_id: String,

    /// Free-form booking details (reason, notes)
    pub details: serde_json::Value,
}

/// A booking as stored by the booking store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    /// Store-assigned booking identifier
    pub booking_id: String,

    /// Provider booked
    pub provider_id: String,

    /// Calendar date
    pub date: NaiveDate,

    /// Start time
    pub time: NaiveTime,

    /// Length in minutes
    pub duration_minutes: u32,

    /// Subject the booking is for
    pub subject_id: String,
}

/// Text-completion service used for form generation and triage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Complete a prompt, returning the raw model text
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Payer eligibility check
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EligibilityCheckService: Send + Sync {
    /// Verify a policy, returning the payer's raw payload
    async fn verify(&self, policy: &SubjectPolicy) -> Result<serde_json::Value, CollaboratorError>;
}

/// Provider calendar availability
#[async_trait]
pub trait SlotAvailabilityService: Send + Sync {
    /// Open slots within a date range, for one provider or for all of them
    async fn list_slots(
        &self,
        provider_id: Option<&str>,
        range: DateRange,
    ) -> Result<Vec<Slot>, CollaboratorError>;
}

/// Persistent bookings
///
/// Implementations must guarantee that two concurrent `book` calls for the
/// same provider, date and time cannot both succeed.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Existing bookings for a provider at a date and time
    async fn find_bookings(
        &self,
        provider_id: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<BookingRecord>, CollaboratorError>;

    /// Reserve a slot; `CollaboratorError::Conflict` if it is already taken
    async fn book(&self, request: BookingRequest) -> Result<BookingRecord, CollaboratorError>;
}

/// In-memory collaborator implementations
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::sync::Arc;

    type SlotKey = (String, NaiveDate, NaiveTime);

    /// Booking store keyed by provider/date/time.
    ///
    /// The DashMap entry lock makes the check-and-insert atomic, so at most
    /// one concurrent writer wins a slot.
    #[derive(Clone, Default)]
    pub struct InMemoryBookingStore {
        bookings: Arc<DashMap<SlotKey, BookingRecord>>,
    }

    impl InMemoryBookingStore {
        /// Create an empty booking store
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of bookings held
        pub fn len(&self) -> usize {
            self.bookings.len()
        }

        /// Whether the store holds no bookings
        pub fn is_empty(&self) -> bool {
            self.bookings.is_empty()
        }
    }

    #[async_trait]
    impl BookingStore for InMemoryBookingStore {
        async fn find_bookings(
            &self,
            provider_id: &str,
            date: NaiveDate,
            time: NaiveTime,
        ) -> Result<Vec<BookingRecord>, CollaboratorError> {
            let key = (provider_id.to_string(), date, time);
            Ok(self.bookings.get(&key).map(|b| vec![b.clone()]).unwrap_or_default())
        }

        async fn book(&self, request: BookingRequest) -> Result<BookingRecord, CollaboratorError> {
            let key = (request.provider_id.clone(), request.date, request.time);
            match self.bookings.entry(key) {
                Entry::Occupied(existing) => Err(CollaboratorError::Conflict(format!(
                    "slot {} {} with provider {} already booked as {}",
                    request.date,
                    request.time,
                    request.provider_id,
                    existing.get().booking_id
                ))),
                Entry::Vacant(slot) => {
                    let record = BookingRecord {
                        booking_id: uuid::Uuid::new_v4().to_string(),
                        provider_id: request.provider_id,
                        date: request.date,
                        time: request.time,
                        duration_minutes: request.duration_minutes,
                        subject_id: request.subject_id,
                    };
                    slot.insert(record.clone());
                    Ok(record)
                }
            }
        }
    }

}
