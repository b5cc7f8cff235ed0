use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shuttle_core::{EngineError, EngineResult, ExternalBusyWindow, Trip};

/// A bookable window on a service day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Local wall-clock label, e.g. `08:00 - 09:30`.
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotAvailability {
    #[serde(flatten)]
    pub slot: Slot,
    pub blocked: bool,
    pub reservable: bool,
    pub available: bool,
}

/// Generates the slot grid of a service day in the operator's time zone.
#[derive(Debug, Clone)]
pub struct SlotCalendar {
    tz: Tz,
    non_service_days: Vec<Weekday>,
}

impl SlotCalendar {
    pub fn new(tz: Tz, non_service_days: Vec<Weekday>) -> Self {
        Self {
            tz,
            non_service_days,
        }
    }

    pub fn is_service_day(&self, day: NaiveDate) -> bool {
        !self.non_service_days.contains(&day.weekday())
    }

    /// Service-local calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Every service-local date from the one containing `start` to the one
    /// containing `end`, in order.
    pub fn days_touched(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<NaiveDate> {
        let last = self.local_date(end);
        let mut day = self.local_date(start);
        let mut days = Vec::new();
        while day <= last {
            days.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }

    /// `[local midnight, next local midnight)` of `day`, in UTC.
    pub fn day_bounds(&self, day: NaiveDate) -> EngineResult<(DateTime<Utc>, DateTime<Utc>)> {
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| EngineError::Validation(format!("Invalid day: {}", day)))?;
        let start = self.to_utc(midnight)?;
        let end = self.to_utc(midnight + Duration::days(1))?;
        Ok((start, end))
    }

    /// Ordered slots of `day` between `start_hour` and `end_hour` local time.
    ///
    /// Starts advance by `interval_minutes`. A slot is emitted while its base
    /// interval fits before `end_hour`. With `slot_duration_minutes` each slot
    /// spans that duration instead, so long slots overlap their successors.
    pub fn generate_slots(
        &self,
        day: NaiveDate,
        start_hour: u32,
        end_hour: u32,
        interval_minutes: u32,
        slot_duration_minutes: Option<u32>,
    ) -> EngineResult<Vec<Slot>> {
        if end_hour > 24 || start_hour >= end_hour {
            return Err(EngineError::Validation(format!(
                "Invalid service hours {}..{}",
                start_hour, end_hour
            )));
        }
        if interval_minutes == 0 {
            return Err(EngineError::Validation(
                "Slot interval must be positive".to_string(),
            ));
        }
        if slot_duration_minutes == Some(0) {
            return Err(EngineError::Validation(
                "Slot duration must be positive".to_string(),
            ));
        }

        if !self.is_service_day(day) {
            return Ok(Vec::new());
        }

        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| EngineError::Validation(format!("Invalid day: {}", day)))?;
        let step = Duration::minutes(interval_minutes as i64);
        let span = Duration::minutes(slot_duration_minutes.unwrap_or(interval_minutes) as i64);
        let closing = midnight + Duration::hours(end_hour as i64);

        let mut slots = Vec::new();
        let mut cursor = midnight + Duration::hours(start_hour as i64);

        while cursor + step <= closing {
            let local_end = cursor + span;
            // Local times skipped by a DST jump have no instant; skip the slot
            if let (Ok(start), Ok(end)) = (self.to_utc(cursor), self.to_utc(local_end)) {
                slots.push(Slot {
                    start,
                    end,
                    label: format!("{} - {}", cursor.format("%H:%M"), local_end.format("%H:%M")),
                });
            }
            cursor += step;
        }

        Ok(slots)
    }

    /// Slots of `day` annotated with blocking and cutoff state.
    #[allow(clippy::too_many_arguments)]
    pub fn availability(
        &self,
        day: NaiveDate,
        start_hour: u32,
        end_hour: u32,
        interval_minutes: u32,
        slot_duration_minutes: Option<u32>,
        trips: &[Trip],
        external: &[ExternalBusyWindow],
        cutoff_minutes: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<SlotAvailability>> {
        let slots = self.generate_slots(
            day,
            start_hour,
            end_hour,
            interval_minutes,
            slot_duration_minutes,
        )?;

        Ok(slots
            .into_iter()
            .map(|slot| {
                let blocked = is_blocked(slot.start, slot.end, trips, external);
                let reservable = is_reservable(slot.start, cutoff_minutes, now);
                SlotAvailability {
                    slot,
                    blocked,
                    reservable,
                    available: !blocked && reservable,
                }
            })
            .collect())
    }

    fn to_utc(&self, local: NaiveDateTime) -> EngineResult<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                EngineError::Validation(format!("{} does not exist in {}", local, self.tz))
            })
    }
}

/// True when `[slot_start, slot_end)` overlaps any non-cancelled trip or busy window.
pub fn is_blocked(
    slot_start: DateTime<Utc>,
    slot_end: DateTime<Utc>,
    trips: &[Trip],
    external: &[ExternalBusyWindow],
) -> bool {
    let overlaps = |start: DateTime<Utc>, end: DateTime<Utc>| slot_start < end && slot_end > start;

    trips
        .iter()
        .filter(|t| !t.is_cancelled())
        .any(|t| overlaps(t.start_time, t.end_time))
        || external.iter().any(|w| overlaps(w.start, w.end))
}

/// False once `now` is past the booking cutoff before `slot_start`.
pub fn is_reservable(slot_start: DateTime<Utc>, cutoff_minutes: u32, now: DateTime<Utc>) -> bool {
    now <= slot_start - Duration::minutes(cutoff_minutes as i64)
}
