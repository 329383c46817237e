//! journal-cli - command-line client for the voice journal HTTP API
//!
//! # Subcommands
//! - `history --user <id> [--json]`                        - print a user's chat history
//! - `summarize --user <id> [--date yyyy-MM-dd] [--json]`  - summarize today's entries
//! - `summaries --user <id> --start <d> --end <d> [--json]` - stored summaries (needs token)
//! - `dates --user <id> --start <d> --end <d> [--json]`     - dates with summaries (needs token)
//! - `status`                                               - show server health

use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "journal-cli", version, about = "Voice journal command-line client")]
struct Cli {
    /// Journal HTTP server URL (overrides JOURNAL_HTTP_URL env var)
    #[arg(long, env = "JOURNAL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Bearer token for authenticated endpoints
    #[arg(long, env = "JOURNAL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the in-memory chat history for a user
    History {
        #[arg(short, long)]
        user: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Summarize a user's entries (stored only when the token owns the user)
    Summarize {
        #[arg(short, long)]
        user: String,

        /// Logical day of the summary (defaults to today on the server)
        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List stored summaries in a date range
    Summaries {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long)]
        json: bool,
    },

    /// List dates that have stored summaries
    Dates {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long)]
        json: bool,
    },

    /// Show journal server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One chat history entry from GET /chat-history
#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub role: String,
    pub timestamp: i64,
}

/// One stored summary from GET /summaries
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub user_id: String,
    pub date: String,
    pub polished_entry: String,
    pub key_points: String,
    #[serde(default)]
    pub original_entries: Vec<String>,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct SummaryReply {
    pub summary: String,
}

// ============================================================================
// Formatting
// ============================================================================

/// One line per history entry: `[kind] content`, with error entries flagged.
pub fn format_history_entry(entry: &HistoryEntry) -> String {
    let label = match entry.kind.as_str() {
        "user" => "you",
        "assistant" => "assistant",
        "error" => "error!",
        other => other,
    };
    format!("[{}] {}", label, entry.content)
}

/// Human-readable block for a stored summary.
pub fn format_summary(record: &SummaryRecord) -> String {
    let mut out = format!("== {} ==\n{}\n", record.date, record.polished_entry.trim());
    if !record.key_points.trim().is_empty() {
        out.push('\n');
        out.push_str(record.key_points.trim());
        out.push('\n');
    }
    out.push_str(&format!(
        "({} original entr{})\n",
        record.original_entries.len(),
        if record.original_entries.len() == 1 { "y" } else { "ies" }
    ));
    out
}

/// Newest summary first; same-day summaries ordered by write time.
pub fn sort_newest_first(records: &mut [SummaryRecord]) {
    records.sort_by(|a, b| b.date.cmp(&a.date).then(b.timestamp.cmp(&a.timestamp)));
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(std::time::Duration::from_secs(90))
        .build()?)
}

fn with_token(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(t) => request.bearer_auth(t),
        None => request,
    }
}

/// Send and return the body, turning non-success statuses into errors.
fn send(request: RequestBuilder, url: &str) -> anyhow::Result<String> {
    let resp = request
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if !status.is_success() {
        match status.as_u16() {
            401 => anyhow::bail!("unauthorized (HTTP 401): pass --token or set JOURNAL_TOKEN"),
            403 => anyhow::bail!("forbidden (HTTP 403): token does not own this user id"),
            _ => anyhow::bail!("server returned {}: {}", status, body),
        }
    }
    Ok(body)
}

fn do_history(server: &str, user: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/chat-history", server);
    let body = send(client()?.get(&url).query(&[("userId", user)]), &url)?;

    if json_output {
        println!("{}", body);
        return Ok(());
    }

    let entries: Vec<HistoryEntry> = serde_json::from_str(&body)?;
    if entries.is_empty() {
        eprintln!("No history for {}", user);
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_history_entry(entry));
    }
    Ok(())
}

fn do_summarize(
    server: &str,
    token: Option<&str>,
    user: &str,
    date: Option<&str>,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/summary", server);
    let mut query = vec![("userId", user)];
    if let Some(d) = date {
        query.push(("date", d));
    }
    let request = with_token(client()?.post(&url).query(&query), token);
    let body = send(request, &url)?;

    if json_output {
        println!("{}", body);
        return Ok(());
    }

    let reply: SummaryReply = serde_json::from_str(&body)?;
    println!("{}", reply.summary);
    if token.is_none() {
        eprintln!("(not saved: no token)");
    }
    Ok(())
}

fn do_summaries(
    server: &str,
    token: Option<&str>,
    user: &str,
    start: &str,
    end: &str,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/summaries", server);
    let request = with_token(
        client()?
            .get(&url)
            .query(&[("userId", user), ("startDate", start), ("endDate", end)]),
        token,
    );
    let body = send(request, &url)?;

    if json_output {
        println!("{}", body);
        return Ok(());
    }

    let mut records: Vec<SummaryRecord> = serde_json::from_str(&body)?;
    if records.is_empty() {
        eprintln!("No summaries between {} and {}", start, end);
        return Ok(());
    }
    sort_newest_first(&mut records);
    for record in &records {
        println!("{}", format_summary(record));
    }
    Ok(())
}

fn do_dates(
    server: &str,
    token: Option<&str>,
    user: &str,
    start: &str,
    end: &str,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/summary-dates", server);
    let request = with_token(
        client()?
            .get(&url)
            .query(&[("userId", user), ("startDate", start), ("endDate", end)]),
        token,
    );
    let body = send(request, &url)?;

    if json_output {
        println!("{}", body);
        return Ok(());
    }

    let dates: Vec<String> = serde_json::from_str(&body)?;
    for date in &dates {
        println!("{}", date);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Journal server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!(
                "Summary store:  {} ({})",
                body["summary_store"].as_str().unwrap_or("?"),
                body["summary_store_detail"].as_str().unwrap_or("?")
            );
            println!("Completion:     {}", body["completion"].as_str().unwrap_or("?"));
            println!("Active users:   {}", body["history_users"].as_u64().unwrap_or(0));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("journal-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("journal-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let token = cli.token.as_deref().filter(|t| !t.is_empty());

    let result = match cli.command {
        Commands::History { user, json } => do_history(&server, &user, json),
        Commands::Summarize { user, date, json } => {
            do_summarize(&server, token, &user, date.as_deref(), json)
        }
        Commands::Summaries {
            user,
            start,
            end,
            json,
        } => do_summaries(&server, token, &user, &start, &end, json),
        Commands::Dates {
            user,
            start,
            end,
            json,
        } => do_dates(&server, token, &user, &start, &end, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("journal-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, timestamp: i64, entries: usize) -> SummaryRecord {
        SummaryRecord {
            user_id: "u1".to_string(),
            date: date.to_string(),
            polished_entry: "A quiet day.".to_string(),
            key_points: "- read\n- walked".to_string(),
            original_entries: vec!["entry".to_string(); entries],
            timestamp,
        }
    }

    #[test]
    fn test_history_entry_parses_server_shape() {
        let raw = r#"{"id":"7b5c24ab-1234-5678-9abc-def012345678","type":"error","content":"Error processing message","role":"assistant","timestamp":1700000000000}"#;
        let entry: HistoryEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.kind, "error");
        assert_eq!(entry.role, "assistant");
        assert_eq!(format_history_entry(&entry), "[error!] Error processing message");
    }

    #[test]
    fn test_history_entry_labels() {
        let mut entry = HistoryEntry {
            id: "x".to_string(),
            kind: "user".to_string(),
            content: "I slept in".to_string(),
            role: "user".to_string(),
            timestamp: 0,
        };
        assert_eq!(format_history_entry(&entry), "[you] I slept in");
        entry.kind = "assistant".to_string();
        assert_eq!(format_history_entry(&entry), "[assistant] I slept in");
    }

    #[test]
    fn test_summary_record_parses_camel_case() {
        let raw = r#"{"userId":"u1","date":"2024-01-15","polishedEntry":"Entry","keyPoints":"Points","originalEntries":["a","b"],"timestamp":1}"#;
        let record: SummaryRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.original_entries.len(), 2);
    }

    #[test]
    fn test_format_summary_includes_key_points_and_count() {
        let out = format_summary(&record("2024-01-15", 1, 1));
        assert!(out.starts_with("== 2024-01-15 ==\nA quiet day.\n"));
        assert!(out.contains("- read\n- walked"));
        assert!(out.ends_with("(1 original entry)\n"));
    }

    #[test]
    fn test_format_summary_without_key_points() {
        let mut r = record("2024-01-15", 1, 3);
        r.key_points = String::new();
        let out = format_summary(&r);
        assert_eq!(out, "== 2024-01-15 ==\nA quiet day.\n(3 original entries)\n");
    }

    #[test]
    fn test_sort_newest_first_breaks_ties_by_timestamp() {
        let mut records = vec![
            record("2024-01-01", 5, 1),
            record("2024-01-15", 1, 1),
            record("2024-01-15", 9, 1),
        ];
        sort_newest_first(&mut records);
        let order: Vec<(&str, i64)> = records
            .iter()
            .map(|r| (r.date.as_str(), r.timestamp))
            .collect();
        assert_eq!(
            order,
            vec![("2024-01-15", 9), ("2024-01-15", 1), ("2024-01-01", 5)]
        );
    }
}
