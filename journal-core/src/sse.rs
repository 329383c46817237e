//! Line framing and record parsing for the streamed chat-completion body.
//!
//! The provider sends newline-delimited `data: <json>` records and ends the
//! stream with `data: [DONE]`. Network reads do not respect record boundaries,
//! so bytes are buffered until a full line is available.

use bytes::BytesMut;
use serde::Deserialize;
use tokio_util::codec::Decoder;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into lines. Invalid UTF-8 is replaced rather than
/// failing the stream, so one corrupt record cannot take the rest down with it.
#[derive(Debug, Default)]
pub struct RecordLineDecoder;

impl Decoder for RecordLineDecoder {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line = buf.split_to(newline + 1);
        Ok(Some(to_line(&line)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Trailing record without a final newline
        let rest = buf.split();
        Ok(Some(to_line(&rest)))
    }
}

fn to_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Outcome of parsing one line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A non-empty content delta.
    Content(String),
    /// The terminating sentinel.
    Done,
    /// Blank lines, comments, non-data fields, deltas without content and
    /// malformed records.
    Skip,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn parse_record(line: &str) -> Record {
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Record::Skip;
    };
    let payload = payload.trim_start();
    if payload == DONE_SENTINEL {
        return Record::Done;
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty())
            .map(Record::Content)
            .unwrap_or(Record::Skip),
        Err(e) => {
            tracing::debug!(error = %e, record = %payload, "Skipping malformed stream record");
            Record::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> String {
        format!(
            "data: {}",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]})
        )
    }

    #[test]
    fn test_decoder_waits_for_full_line() {
        let mut decoder = RecordLineDecoder;
        let mut buf = BytesMut::from(&b"data: {\"choi"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ces\":[]}\r\ndata: [DO");
        assert_eq!(
            decoder.decode(&mut buf).unwrap().as_deref(),
            Some("data: {\"choices\":[]}")
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"data: [DO");
    }

    #[test]
    fn test_decoder_flushes_trailing_partial_line_at_eof() {
        let mut decoder = RecordLineDecoder;
        let mut buf = BytesMut::from(&b"data: [DONE]"[..]);
        assert_eq!(
            decoder.decode_eof(&mut buf).unwrap().as_deref(),
            Some("data: [DONE]")
        );
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decoder_replaces_invalid_utf8() {
        let mut decoder = RecordLineDecoder;
        let mut buf = BytesMut::from(&b"data: \xff\xfe\n"[..]);
        let line = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(line.starts_with("data: "));
        assert_eq!(parse_record(&line), Record::Skip);
    }

    #[test]
    fn test_parse_content_delta() {
        assert_eq!(
            parse_record(&delta("Talk about")),
            Record::Content("Talk about".to_string())
        );
    }

    #[test]
    fn test_parse_sentinel_and_noise() {
        assert_eq!(parse_record("data: [DONE]"), Record::Done);
        assert_eq!(parse_record("data:[DONE]"), Record::Done);
        assert_eq!(parse_record(""), Record::Skip);
        assert_eq!(parse_record(": keep-alive"), Record::Skip);
        assert_eq!(parse_record("event: ping"), Record::Skip);
    }

    #[test]
    fn test_parse_skips_role_only_and_empty_deltas() {
        let role_only = format!(
            "data: {}",
            serde_json::json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]})
        );
        assert_eq!(parse_record(&role_only), Record::Skip);
        assert_eq!(parse_record(&delta("")), Record::Skip);
        assert_eq!(parse_record("data: {\"choices\": []}"), Record::Skip);
    }

    #[test]
    fn test_parse_skips_truncated_json() {
        assert_eq!(
            parse_record("data: {\"choices\": [{\"delta\": {\"content\": \"hal"),
            Record::Skip
        );
    }
}
