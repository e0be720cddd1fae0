use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use serde_json::Value;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod create;
pub mod ls;
pub mod purge;
pub mod recv;
pub mod rm;
pub mod send;
pub mod version;

/// Typedef used when `--typedef` is not given.
pub const DEFAULT_TYPEDEF: &str = r#"{"type":"bytes"}"#;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Allocate a new System V queue and print its key.
    Create(CreateArgs),
    /// List System V queues visible to this user.
    Ls(LsArgs),
    /// Remove System V queues by key.
    Rm(RmArgs),
    /// Send one message to a queue.
    Send(SendArgs),
    /// Receive and print messages from a queue.
    Recv(RecvArgs),
    /// Drop every pending message on a queue.
    Purge(PurgeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Create(args) => create::run(args, format),
        Command::Ls(args) => ls::run(args, format),
        Command::Rm(args) => rm::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Recv(args) => recv::run(args, format),
        Command::Purge(args) => purge::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct CreateArgs {}

#[derive(Args, Debug, Default)]
pub struct LsArgs {}

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Queue keys to remove.
    #[arg(required = true, num_args = 1..)]
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Queue key to send to.
    pub key: String,
    /// JSON value payload.
    #[arg(long, conflicts_with_all = ["data", "file", "eof"])]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with_all = ["json", "file", "eof"])]
    pub data: Option<String>,
    /// Send a file's contents unframed (bytes channels only).
    #[arg(long, conflicts_with_all = ["json", "data", "eof"])]
    pub file: Option<PathBuf>,
    /// Send the end-of-stream sentinel.
    #[arg(long)]
    pub eof: bool,
    /// Channel typedef as JSON.
    #[arg(long, default_value = DEFAULT_TYPEDEF)]
    pub typedef: String,
    /// Split messages larger than one frame.
    #[arg(long)]
    pub nolimit: bool,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Queue key to receive from.
    pub key: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Maximum time to wait for each message (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Channel typedef as JSON.
    #[arg(long, default_value = DEFAULT_TYPEDEF)]
    pub typedef: String,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Queue key to purge.
    pub key: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_typedef(input: &str) -> CliResult<Value> {
    let typedef: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("--typedef is not valid JSON: {err}")))?;
    if !typedef.is_object() {
        return Err(CliError::new(USAGE, "--typedef must be a JSON object"));
    }
    Ok(typedef)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn typedef_must_be_an_object() {
        assert!(parse_typedef(DEFAULT_TYPEDEF).is_ok());
        assert_eq!(parse_typedef("[1]").unwrap_err().code, USAGE);
        assert_eq!(parse_typedef("{").unwrap_err().code, USAGE);
    }
}
