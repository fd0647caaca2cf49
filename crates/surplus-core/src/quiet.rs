/// Minutes in a day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parses `"HH:MM"` into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Whether `minute_of_day` (local wall clock) falls inside quiet hours.
///
/// `start <= end` suppresses `[start, end)`; `start > end` wraps midnight and
/// suppresses `[start, 1440) ∪ [0, end)`. Quiet hours need both bounds; a
/// missing or unparseable bound never suppresses.
pub fn is_quiet_hours_at(start: Option<&str>, end: Option<&str>, minute_of_day: u32) -> bool {
    let (Some(start), Some(end)) = (start.and_then(parse_hhmm), end.and_then(parse_hhmm)) else {
        return false;
    };
    let m = minute_of_day % MINUTES_PER_DAY;
    if start <= end {
        m >= start && m < end
    } else {
        m >= start || m < end
    }
}
