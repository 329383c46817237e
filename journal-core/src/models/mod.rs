pub mod message;
pub mod summary;

pub use message::{Message, MessageKind, Role};
pub use summary::{parse_date, NewSummary, Summary, SummarySections, DATE_FORMAT};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
