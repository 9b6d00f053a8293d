use chrono::{
  DateTime,
  Local,
  Utc
};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Relative age label for
/// `created_at` as seen at `now`.
///
/// Buckets are seconds below a minute,
/// minutes below an hour, hours below a
/// day, then days; each count is the
/// floored quotient. A timestamp in the
/// future counts as zero seconds.
#[must_use]
pub fn time_ago(
  created_at: DateTime<Utc>,
  now: DateTime<Utc>
) -> String {
  let elapsed = now
    .signed_duration_since(created_at)
    .num_seconds()
    .max(0);

  if elapsed < MINUTE {
    format!("{elapsed}s ago")
  } else if elapsed < HOUR {
    format!(
      "{}m ago",
      elapsed / MINUTE
    )
  } else if elapsed < DAY {
    format!("{}h ago", elapsed / HOUR)
  } else {
    format!("{}d ago", elapsed / DAY)
  }
}

/// Local wall-clock rendering used by
/// the detail view.
#[must_use]
pub fn format_local(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(&Local)
    .format("%Y-%m-%d %H:%M:%S")
    .to_string()
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::time_ago;

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn ninety_seconds_is_one_minute() {
    let now = now();
    assert_eq!(
      time_ago(
        now - Duration::seconds(90),
        now
      ),
      "1m ago"
    );
  }

  #[test]
  fn forty_five_seconds_stays_in_seconds()
   {
    let now = now();
    assert_eq!(
      time_ago(
        now - Duration::seconds(45),
        now
      ),
      "45s ago"
    );
  }

  #[test]
  fn bucket_boundaries() {
    let now = now();
    let ago = |secs| {
      time_ago(
        now - Duration::seconds(secs),
        now
      )
    };
    assert_eq!(ago(0), "0s ago");
    assert_eq!(ago(59), "59s ago");
    assert_eq!(ago(60), "1m ago");
    assert_eq!(ago(3599), "59m ago");
    assert_eq!(ago(3600), "1h ago");
    assert_eq!(ago(86_399), "23h ago");
    assert_eq!(ago(86_400), "1d ago");
    assert_eq!(ago(10 * 86_400 + 5), "10d ago");
  }

  #[test]
  fn future_timestamps_clamp_to_zero() {
    let now = now();
    assert_eq!(
      time_ago(
        now + Duration::minutes(3),
        now
      ),
      "0s ago"
    );
  }
}
