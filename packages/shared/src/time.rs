//! Time helpers for the real-time client.
//!
//! The backend speaks RFC 3339 UTC on the wire; everything here stays in UTC
//! and formatting is only for terminal display.

use chrono::{DateTime, SecondsFormat, Utc};

/// Get the current UTC time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp as RFC 3339 with second precision (e.g. for log lines).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a timestamp as a short clock time for chat lines (e.g. "14:05:33").
pub fn format_clock(ts: &DateTime<Utc>) -> String {
    ts.format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_utc_returns_increasing_timestamps() {
        // テスト項目: now_utc が呼び出すたびに増加するタイムスタンプを返す
        // given (前提条件):

        // when (操作):
        let first = now_utc();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = now_utc();

        // then (期待する結果):
        assert!(second >= first);
    }

    #[test]
    fn test_format_timestamp_is_rfc3339_utc() {
        // テスト項目: タイムスタンプが正しく RFC 3339 (UTC) 形式に変換される
        // given (前提条件):
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 9, 30, 15).unwrap();

        // when (操作):
        let result = format_timestamp(&ts);

        // then (期待する結果):
        assert_eq!(result, "2023-01-01T09:30:15Z");
    }

    #[test]
    fn test_format_clock_shows_hours_minutes_seconds() {
        // テスト項目: 短い時刻表記が HH:MM:SS 形式で生成される
        // given (前提条件):
        let ts = Utc.with_ymd_and_hms(2023, 6, 15, 14, 5, 33).unwrap();

        // when (操作):
        let result = format_clock(&ts);

        // then (期待する結果):
        assert_eq!(result, "14:05:33");
    }
}
