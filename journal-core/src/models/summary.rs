use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used on the wire and in query parameters (`yyyy-MM-dd`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

/// A summary as produced by the summarizer, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSummary {
    pub user_id: String,
    /// Logical day of the summary, not necessarily the day it was generated.
    pub date: NaiveDate,
    pub polished_entry: String,
    pub key_points: String,
    pub original_entries: Vec<String>,
}

/// A persisted summary. Immutable once stored; several may exist per user/date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub user_id: String,
    pub date: NaiveDate,
    pub polished_entry: String,
    pub key_points: String,
    pub original_entries: Vec<String>,
    /// Server-side write time, epoch milliseconds.
    pub timestamp: i64,
}

impl Summary {
    pub fn stamped(summary: NewSummary, timestamp: i64) -> Self {
        Self {
            user_id: summary.user_id,
            date: summary.date,
            polished_entry: summary.polished_entry,
            key_points: summary.key_points,
            original_entries: summary.original_entries,
            timestamp,
        }
    }
}

/// The two blocks the summarization model is asked to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySections {
    pub polished_entry: String,
    pub key_points: String,
}

impl SummarySections {
    /// Split model output on the first blank line.
    ///
    /// Output without a blank line is treated as a polished entry with no key
    /// points.
    pub fn parse(text: &str) -> Self {
        match text.split_once("\n\n") {
            Some((entry, points)) => Self {
                polished_entry: entry.to_string(),
                key_points: points.to_string(),
            },
            None => Self {
                polished_entry: text.to_string(),
                key_points: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_split_on_first_blank_line() {
        let s = SummarySections::parse("A\n\nB");
        assert_eq!(s.polished_entry, "A");
        assert_eq!(s.key_points, "B");
    }

    #[test]
    fn test_sections_keep_later_blank_lines_in_key_points() {
        let s = SummarySections::parse("Entry\n\n- one\n\n- two");
        assert_eq!(s.polished_entry, "Entry");
        assert_eq!(s.key_points, "- one\n\n- two");
    }

    #[test]
    fn test_sections_without_separator_fall_back_to_entry() {
        let s = SummarySections::parse("A single paragraph\nwith a line break");
        assert_eq!(s.polished_entry, "A single paragraph\nwith a line break");
        assert!(s.key_points.is_empty());
    }

    #[test]
    fn test_summary_serializes_camel_case_with_iso_date() {
        let summary = Summary::stamped(
            NewSummary {
                user_id: "u1".to_string(),
                date: parse_date("2024-01-15").unwrap(),
                polished_entry: "entry".to_string(),
                key_points: "points".to_string(),
                original_entries: vec!["a".to_string()],
            },
            42,
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["date"], "2024-01-15");
        assert_eq!(json["polishedEntry"], "entry");
        assert_eq!(json["keyPoints"], "points");
        assert_eq!(json["originalEntries"][0], "a");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_parse_date_rejects_other_formats() {
        assert!(parse_date("2024-02-30").is_none());
        assert!(parse_date("01/02/2024").is_none());
        assert_eq!(
            parse_date(" 2024-02-01 "),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }
}
