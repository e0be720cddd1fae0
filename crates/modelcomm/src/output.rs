use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use modelcomm_channel::Message;
use modelcomm_frame::Metadata;
use serde::Serialize;
use serde_json::Value;

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

#[derive(Serialize)]
struct MessageOutput<'a> {
    address: &'a str,
    #[serde(rename = "type")]
    type_name: Option<&'a str>,
    id: Option<&'a str>,
    size: usize,
    value: Value,
    timestamp: String,
}

pub fn print_message(message: &Message, metadata: &Metadata, address: &str, format: OutputFormat) {
    let value = message_value(message);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                address,
                type_name: metadata.type_name(),
                id: metadata.id(),
                size: metadata.size().unwrap_or(0),
                value,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["QUEUE", "TYPE", "SIZE", "VALUE"])
                .add_row(vec![
                    address.to_string(),
                    metadata.type_name().unwrap_or("-").to_string(),
                    metadata.size().unwrap_or(0).to_string(),
                    value_preview(&value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "queue={} type={} size={} value={}",
                address,
                metadata.type_name().unwrap_or("-"),
                metadata.size().unwrap_or(0),
                value_preview(&value)
            );
        }
        OutputFormat::Raw => match message {
            Message::Raw(bytes) => print_raw(bytes),
            Message::Value(Value::String(text)) => print_raw(text.as_bytes()),
            Message::Value(value) => print_raw(value.to_string().as_bytes()),
            Message::Empty | Message::Eof => {}
        },
    }
}

/// One row of the queue listing.
#[derive(Debug, Serialize)]
pub struct QueueRow {
    pub key: String,
    pub msqid: i64,
    pub messages: u64,
    pub bytes: u64,
}

pub fn print_queues(rows: &[QueueRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KEY", "MSQID", "MESSAGES", "BYTES"]);
            for row in rows {
                table.add_row(vec![
                    row.key.clone(),
                    row.msqid.to_string(),
                    row.messages.to_string(),
                    row.bytes.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in rows {
                println!(
                    "key={} msqid={} messages={} bytes={}",
                    row.key, row.msqid, row.messages, row.bytes
                );
            }
        }
    }
}

/// Result of an administrative command on one queue.
#[derive(Debug, Serialize)]
pub struct QueueAction<'a> {
    pub action: &'a str,
    pub key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

pub fn print_action(action: &QueueAction<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(action).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Raw => println!("{}", action.key),
        OutputFormat::Table | OutputFormat::Pretty => match action.count {
            Some(count) => println!("{} {} ({count})", action.action, action.key),
            None => println!("{} {}", action.action, action.key),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn message_value(message: &Message) -> Value {
    match message {
        Message::Value(value) => value.clone(),
        Message::Raw(bytes) => Value::String(bytes_preview(bytes)),
        Message::Empty | Message::Eof => Value::Null,
    }
}

fn value_preview(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn bytes_preview(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", bytes.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
