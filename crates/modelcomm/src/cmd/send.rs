use std::fs;
use std::sync::Arc;

use modelcomm_channel::{Comm, CommConfig, Direction, Message, TransportKind};
use modelcomm_schema::TypeRegistry;

use crate::cmd::{parse_typedef, SendArgs};
use crate::exit::{
    comm_error, io_error, schema_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, USAGE,
};
use crate::output::{print_action, OutputFormat, QueueAction};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let typedef = parse_typedef(&args.typedef)?;
    let message = resolve_message(&args)?;

    let registry = Arc::new(TypeRegistry::new().map_err(|err| schema_error("registry", err))?);
    let config = CommConfig::new("cli-send")
        .with_address(args.key.as_str())
        .with_direction(Direction::Send)
        .with_typedef(typedef);
    let mut comm = Comm::new(&TransportKind::Sysv, registry, config)
        .map_err(|err| comm_error("open failed", err))?;

    let sent = if args.nolimit {
        comm.send_nolimit(&message)
    } else {
        comm.send(&message)
    }
    .map_err(|err| comm_error("send failed", err))?;
    comm.close();

    if !sent {
        let hint = if args.nolimit {
            "send failed: queue closed or full"
        } else {
            "send failed: queue closed, full, or message exceeds one frame (try --nolimit)"
        };
        return Err(CliError::new(FAILURE, hint));
    }

    print_action(
        &QueueAction {
            action: if args.eof { "sent-eof" } else { "sent" },
            key: &args.key,
            count: None,
        },
        format,
    );
    Ok(SUCCESS)
}

fn resolve_message(args: &SendArgs) -> CliResult<Message> {
    if args.eof {
        return Ok(Message::Eof);
    }
    if let Some(json) = &args.json {
        let value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Message::Value(value));
    }
    if let Some(data) = &args.data {
        return Ok(Message::Value(serde_json::Value::String(data.clone())));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        if bytes.is_empty() {
            return Err(CliError::new(DATA_INVALID, "file is empty"));
        }
        return Ok(Message::Raw(bytes.into()));
    }
    Ok(Message::Empty)
}
