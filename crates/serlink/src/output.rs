use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serlink_frame::DecodeStats;
use serlink_rpc::RpcError;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    RemoteError,
    Timeout,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::RemoteError => "remote_error",
            Outcome::Timeout => "timeout",
            Outcome::Failed => "failed",
        }
    }
}

/// One finished RPC call, as reported by `call` and `demo`.
#[derive(Debug, Serialize)]
pub struct CallRecord {
    pub endpoint: String,
    pub function: String,
    pub args: Vec<u8>,
    pub outcome: Outcome,
    pub result: Vec<u8>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallRecord {
    pub fn new(
        endpoint: &str,
        function: &str,
        args: &[u8],
        result: Result<&[u8], &RpcError>,
        elapsed: Duration,
    ) -> Self {
        let (outcome, bytes, error) = match result {
            Ok(bytes) => (Outcome::Ok, bytes.to_vec(), None),
            Err(RpcError::Remote { payload, .. }) => {
                (Outcome::RemoteError, payload.to_vec(), None)
            }
            Err(err @ RpcError::Timeout { .. }) => {
                (Outcome::Timeout, Vec::new(), Some(err.to_string()))
            }
            Err(err) => (Outcome::Failed, Vec::new(), Some(err.to_string())),
        };
        Self {
            endpoint: endpoint.to_string(),
            function: function.to_string(),
            args: args.to_vec(),
            outcome,
            result: bytes,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error,
        }
    }
}

#[derive(Serialize)]
struct CallLine<'a> {
    r#type: &'static str,
    #[serde(flatten)]
    record: &'a CallRecord,
    timestamp: String,
}

#[derive(Serialize)]
struct StatsLine<'a> {
    r#type: &'static str,
    endpoint: &'a str,
    frames: u64,
    bad_start: u64,
    header_crc: u64,
    missing_separator: u64,
    missing_end: u64,
    payload_crc: u64,
    discarded_bytes: u64,
}

pub fn print_calls(records: &[CallRecord], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let timestamp = now_unix_seconds();
            for record in records {
                let line = CallLine {
                    r#type: "call",
                    record,
                    timestamp: timestamp.clone(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "ENDPOINT", "FUNCTION", "ARGS", "OUTCOME", "RESULT", "ELAPSED",
                ]);
            for record in records {
                table.add_row(vec![
                    record.endpoint.clone(),
                    record.function.clone(),
                    byte_list(&record.args),
                    record.outcome.as_str().to_string(),
                    byte_list(&record.result),
                    format!("{} ms", record.elapsed_ms),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for record in records {
                println!(
                    "{}: {}({}) -> {} {} ({} ms)",
                    record.endpoint,
                    record.function,
                    byte_list(&record.args),
                    record.outcome.as_str(),
                    byte_list(&record.result),
                    record.elapsed_ms
                );
            }
        }
        OutputFormat::Raw => {
            for record in records {
                print_raw(&record.result);
            }
        }
    }
}

pub fn print_stats(endpoint: &str, stats: &DecodeStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = StatsLine {
                r#type: "link_stats",
                endpoint,
                frames: stats.frames,
                bad_start: stats.bad_start,
                header_crc: stats.header_crc,
                missing_separator: stats.missing_separator,
                missing_end: stats.missing_end,
                payload_crc: stats.payload_crc,
                discarded_bytes: stats.discarded_bytes,
            };
            println!(
                "{}",
                serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "FRAMES", "REJECTED", "DISCARDED BYTES"])
                .add_row(vec![
                    endpoint.to_string(),
                    stats.frames.to_string(),
                    stats.rejections().to_string(),
                    stats.discarded_bytes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{endpoint}: frames={} rejected={} discarded_bytes={}",
                stats.frames,
                stats.rejections(),
                stats.discarded_bytes
            );
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn byte_list(bytes: &[u8]) -> String {
    let items: Vec<String> = bytes.iter().map(u8::to_string).collect();
    format!("[{}]", items.join(", "))
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
