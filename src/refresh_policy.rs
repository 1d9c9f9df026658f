use chrono::{DateTime, Utc};

/// Refresh buffer: how long before certificate expiration the cache still
/// treats a connection-info value as usable, but no longer worth scheduling
/// around.
const REFRESH_BUFFER: i64 = 4 * 60;

/// How long to wait before starting the next background refresh, given an
/// expiration timestamp. Refreshing immediately (0) once less than the
/// buffer remains, refreshing `REFRESH_BUFFER` seconds before expiry when
/// there is at least an hour of headroom, and otherwise refreshing halfway
/// through the remaining lifetime so short-lived certificates still get a
/// few refresh attempts before they expire.
pub fn seconds_until_refresh(expiration: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let duration = (expiration - now).num_seconds();
    if duration < 3600 {
        if duration < REFRESH_BUFFER {
            0
        } else {
            duration - REFRESH_BUFFER
        }
    } else {
        duration / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn refreshes_immediately_within_buffer() {
        let now = Utc::now();
        assert_eq!(seconds_until_refresh(now + Duration::seconds(100), now), 0);
        assert_eq!(seconds_until_refresh(now, now), 0);
    }

    #[test]
    fn refreshes_buffer_seconds_before_expiry_under_an_hour() {
        let now = Utc::now();
        let exp = now + Duration::seconds(1800);
        assert_eq!(seconds_until_refresh(exp, now), 1800 - REFRESH_BUFFER);
    }

    #[test]
    fn refreshes_halfway_when_over_an_hour_remains() {
        let now = Utc::now();
        let exp = now + Duration::seconds(7200);
        assert_eq!(seconds_until_refresh(exp, now), 3600);
    }

    #[test]
    fn monotonic_in_remaining_duration() {
        let now = Utc::now();
        let short = seconds_until_refresh(now + Duration::seconds(500), now);
        let longer = seconds_until_refresh(now + Duration::seconds(1500), now);
        assert!(longer >= short);
    }
}
