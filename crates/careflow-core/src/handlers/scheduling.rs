use super::{bounded, StepContext, StepHandler, StepHandlerBase};
use crate::config::OrchestratorConfig;
use crate::domain::collaborators::{
    BookingRequest, BookingStore, DateRange, SlotAvailabilityService, SubjectPolicy,
};
use crate::domain::step_output::{BookedSlot, CandidateSlots, StepOutput, SubjectDetails};
use crate::domain::workflow_definition::{HandlerKind, StepName};
use crate::HandlerError;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Validates scheduling requests, searches for slots and books them
pub struct SchedulingHandler {
    slots: Arc<dyn SlotAvailabilityService>,
    bookings: Arc<dyn BookingStore>,
    timeout: Duration,
    search_days: u32,
}

impl SchedulingHandler {
    /// Create a new scheduling handler
    pub fn new(
        slots: Arc<dyn SlotAvailabilityService>,
        bookings: Arc<dyn BookingStore>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            slots,
            bookings,
            timeout: config.collaborator_timeout(),
            search_days: config.slot_search_days.max(1),
        }
    }

    fn collect_subject_details(&self, ctx: &StepContext) -> Result<SubjectDetails, HandlerError> {
        let provider_id = match input_value(ctx, "provider_id", "providerId") {
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => optional_str(ctx, "provider_id", "providerId")?.map(str::to_string),
        };

        let preferred_date = optional_str(ctx, "preferred_date", "preferredDate")?
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                    HandlerError::InvalidInput(format!(
                        "preferred_date must be YYYY-MM-DD, got {:?}",
                        raw
                    ))
                })
            })
            .transpose()?;

        let preferred_time = optional_str(ctx, "preferred_time", "preferredTime")?
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M")
                    .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
                    .map_err(|_| {
                        HandlerError::InvalidInput(format!(
                            "preferred_time must be HH:MM, got {:?}",
                            raw
                        ))
                    })
            })
            .transpose()?;

        let reason = optional_str(ctx, "reason", "reason")?.map(str::to_string);

        let policy = match ctx.input.get("policy") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<SubjectPolicy>(value.clone()).map_err(|e| {
                    HandlerError::InvalidInput(format!("policy is malformed: {}", e))
                })?,
            ),
        };

        Ok(SubjectDetails {
            subject_id: ctx.subject_id.0.clone(),
            provider_id,
            preferred_date,
            preferred_time,
            reason,
            policy,
        })
    }

    async fn find_candidate_slots(&self, ctx: &StepContext) -> Result<CandidateSlots, HandlerError> {
        let details = ctx.subject_details()?;
        let start = details
            .preferred_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let end = start
            .checked_add_days(Days::new(u64::from(self.search_days - 1)))
            .ok_or_else(|| HandlerError::InvalidInput(format!("date {} is out of range", start)))?;
        let range = DateRange { start, end };

        let provider = details.provider_id.as_deref();

        let mut slots = bounded(self.timeout, self.slots.list_slots(provider, range)).await?;

        // Without a provider any provider's slot qualifies
        slots.retain(|s| {
            provider.map_or(true, |p| s.provider_id == p) && s.date >= start && s.date <= end
        });
        if slots.is_empty() {
            return Err(HandlerError::NoSlotAvailable(format!(
                "{} has no open slot between {} and {}",
                provider.map_or_else(|| "no provider".to_string(), |p| format!("provider {}", p)),
                start,
                end
            )));
        }

        // Preferred time first, then chronological
        let preferred_time = details.preferred_time;
        slots.sort_by_key(|s| (Some(s.time) != preferred_time, s.date, s.time));

        debug!(
            provider_id = provider.unwrap_or("any"),
            candidates = slots.len(),
            "Found candidate slots"
        );

        Ok(CandidateSlots { slots })
    }

    async fn book(&self, ctx: &StepContext) -> Result<BookedSlot, HandlerError> {
        let details = ctx.subject_details()?;
        let slot = ctx.candidate_slots()?.slots.first().ok_or_else(|| {
            HandlerError::NoSlotAvailable(format!("no candidate slot for subject {}", details.subject_id))
        })?;

        let existing = bounded(
            self.timeout,
            self.bookings
                .find_bookings(&slot.provider_id, slot.date, slot.time),
        )
        .await?;
        if let Some(taken) = existing.first() {
            return Err(HandlerError::BookingConflict(format!(
                "slot {} {} with provider {} already booked as {}",
                slot.date, slot.time, slot.provider_id, taken.booking_id
            )));
        }

        let request = BookingRequest {
            provider_id: slot.provider_id.clone(),
            date: slot.date,
            time: slot.time,
            duration_minutes: slot.duration_minutes,
            subject_id: details.subject_id.clone(),
            details: json!({
                "reason": details.reason,
                "related_id": ctx.related_id,
                "orchestration_id": ctx.orchestration_id,
            }),
        };
        let record = bounded(self.timeout, self.bookings.book(request)).await?;

        info!(
            orchestration_id = %ctx.orchestration_id,
            booking_id = %record.booking_id,
            provider_id = %record.provider_id,
            date = %record.date,
            time = %record.time,
            "Slot booked"
        );

        Ok(BookedSlot {
            booking_id: record.booking_id,
            provider_id: record.provider_id,
            date: record.date,
            time: record.time,
            duration_minutes: record.duration_minutes,
        })
    }
}

/// Input value under its snake_case key or its camelCase alias
fn input_value<'a>(ctx: &'a StepContext, key: &str, alias: &str) -> Option<&'a Value> {
    ctx.input.get(key).or_else(|| ctx.input.get(alias))
}

fn optional_str<'a>(
    ctx: &'a StepContext,
    key: &str,
    alias: &str,
) -> Result<Option<&'a str>, HandlerError> {
    match input_value(ctx, key, alias) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(HandlerError::InvalidInput(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

impl StepHandlerBase for SchedulingHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Scheduling
    }

    fn supports(&self, step: StepName) -> bool {
        matches!(
            step,
            StepName::CollectSubjectDetails | StepName::FindCandidateSlots | StepName::Book
        )
    }
}

#[async_trait]
impl StepHandler for SchedulingHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, HandlerError> {
        match ctx.step {
            StepName::CollectSubjectDetails => {
                self.collect_subject_details(ctx).map(StepOutput::SubjectDetails)
            }
            StepName::FindCandidateSlots => self
                .find_candidate_slots(ctx)
                .await
                .map(StepOutput::CandidateSlots),
            StepName::Book => self.book(ctx).await.map(StepOutput::Booking),
            other => Err(HandlerError::InvalidInput(format!(
                "scheduling handler cannot execute step {}",
                other
            ))),
        }
    }
}
