use chrono::{DateTime, Duration, Utc};

use crate::types::Trigger;

/// Compute the first fire time strictly *after* `after`.
///
/// `anchor` is the first fire time of an interval trigger; cron triggers
/// ignore it. Returns `None` when the trigger can never fire again.
pub fn next_fire_after(
    trigger: &Trigger,
    anchor: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval { every } => {
            if after < anchor {
                return Some(anchor);
            }
            let step = i64::try_from(every.as_nanos()).ok().filter(|s| *s > 0)?;
            let elapsed = (after - anchor).num_nanoseconds()?;
            let offset = step.checked_mul(elapsed / step + 1)?;
            anchor.checked_add_signed(Duration::nanoseconds(offset))
        }
        Trigger::Cron { schedule, .. } => schedule.after(&after).next(),
    }
}

/// Like [`next_fire_after`] but `at` itself counts when it is a fire time.
pub fn next_fire_at_or_after(
    trigger: &Trigger,
    anchor: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_fire_after(trigger, anchor, at - Duration::nanoseconds(1))
}
