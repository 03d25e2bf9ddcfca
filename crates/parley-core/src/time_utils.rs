use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, saturating at `u64::MAX`.
pub fn current_unix_timestamp_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Deadline `ttl_ms` after `now_ms`; no ttl means no deadline.
pub fn deadline_after_ms(now_ms: u64, ttl_ms: Option<u64>) -> Option<u64> {
    ttl_ms.map(|ttl| now_ms.saturating_add(ttl))
}

/// A deadline has passed once `now_ms` reaches it. A missing deadline never passes.
pub fn is_past_deadline_ms(deadline_ms: Option<u64>, now_ms: u64) -> bool {
    deadline_ms.is_some_and(|deadline| now_ms >= deadline)
}

/// Sleep length from `now_ms` until `due_ms`; zero when already due.
pub fn duration_until_ms(due_ms: u64, now_ms: u64) -> Duration {
    Duration::from_millis(due_ms.saturating_sub(now_ms))
}
