//! Confirmation deadline policy
//!
//! A guide must confirm by the cutoff (22:00 local) on the day before the trip.
//! For near-term trips the deadline is pushed to the next cutoff that has not
//! yet started, so the guide always gets at least one full cycle to respond.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Cutoff time and local offset used for deadline math
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    cutoff: NaiveTime,
    offset: FixedOffset,
}

impl DeadlinePolicy {
    pub fn new(cutoff: NaiveTime, offset: FixedOffset) -> Self {
        Self { cutoff, offset }
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Deadline for a trip scheduled on `trip_date`, computed at instant `now`.
    ///
    /// `max(H-1 cutoff, next cutoff)`, where the next cutoff is today's if the
    /// local clock has not reached it yet and tomorrow's otherwise.
    pub fn confirmation_deadline(&self, trip_date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
        let day_before = trip_date.pred_opt().unwrap_or(trip_date);
        let naive_deadline = self.cutoff_on(day_before);

        let local_now = now.with_timezone(&self.offset);
        let today = local_now.date_naive();
        let minimum = if local_now.time() >= self.cutoff {
            self.cutoff_on(today.succ_opt().unwrap_or(today))
        } else {
            self.cutoff_on(today)
        };

        naive_deadline.max(minimum)
    }

    /// The cutoff instant on a local calendar day
    pub fn cutoff_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(self.cutoff);
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&(local - shift))
    }

    /// Local calendar date of an instant
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DeadlinePolicy {
        DeadlinePolicy::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            FixedOffset::east_opt(7 * 3600).unwrap(),
        )
    }

    fn local(policy: &DeadlinePolicy, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        policy
            .offset()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_far_trip_uses_day_before_cutoff() {
        let p = policy();
        let now = local(&p, 2026, 10, 19, 10, 0);
        let deadline = p.confirmation_deadline(date(2026, 10, 25), now);
        assert_eq!(deadline, local(&p, 2026, 10, 24, 22, 0));
    }

    #[test]
    fn test_tomorrow_trip_before_cutoff_uses_tonight() {
        let p = policy();
        let now = local(&p, 2026, 10, 19, 10, 0);
        let deadline = p.confirmation_deadline(date(2026, 10, 20), now);
        assert_eq!(deadline, local(&p, 2026, 10, 19, 22, 0));
    }

    #[test]
    fn test_same_day_trip_gets_tonight() {
        let p = policy();
        let now = local(&p, 2026, 10, 19, 10, 0);
        let deadline = p.confirmation_deadline(date(2026, 10, 19), now);
        assert_eq!(deadline, local(&p, 2026, 10, 19, 22, 0));
    }

    #[test]
    fn test_after_cutoff_rolls_to_next_day() {
        let p = policy();
        let now = local(&p, 2026, 10, 19, 23, 15);
        let deadline = p.confirmation_deadline(date(2026, 10, 20), now);
        assert_eq!(deadline, local(&p, 2026, 10, 20, 22, 0));
    }

    #[test]
    fn test_exactly_at_cutoff_rolls_to_next_day() {
        let p = policy();
        let now = local(&p, 2026, 10, 19, 22, 0);
        let deadline = p.confirmation_deadline(date(2026, 10, 20), now);
        assert_eq!(deadline, local(&p, 2026, 10, 20, 22, 0));
    }

    #[test]
    fn test_local_midnight_crossing_uses_local_date() {
        // 17:30Z on the 19th is 00:30 local on the 20th
        let p = policy();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 17, 30, 0).unwrap();
        let deadline = p.confirmation_deadline(date(2026, 10, 20), now);
        assert_eq!(deadline, local(&p, 2026, 10, 20, 22, 0));
    }

    #[test]
    fn test_deadline_never_before_next_cutoff() {
        let p = policy();
        let start = local(&p, 2026, 10, 1, 0, 0);
        for step in 0..(14 * 24 * 4) {
            let now = start + Duration::minutes(15 * step);
            for offset_days in -2..6 {
                let trip_date = p.local_date(now) + Duration::days(offset_days);
                let deadline = p.confirmation_deadline(trip_date, now);

                assert!(deadline > now, "deadline {} not after {}", deadline, now);
                assert!(deadline - now <= Duration::hours(24) || deadline == p.cutoff_on(trip_date.pred_opt().unwrap()));
                assert!(deadline >= p.cutoff_on(trip_date.pred_opt().unwrap()));
                assert_eq!(deadline.with_timezone(&p.offset()).time(), p.cutoff());
            }
        }
    }
}
