use modelcomm_channel::TransportKind;
use modelcomm_transport::DirectTransport;

use crate::cmd::PurgeArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_action, OutputFormat, QueueAction};

pub fn run(args: PurgeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut queue = TransportKind::Sysv
        .endpoint(&args.key)
        .map_err(|err| transport_error("open failed", err))?;
    queue
        .open_direct()
        .map_err(|err| transport_error("open failed", err))?;
    let purged = queue
        .purge()
        .map_err(|err| transport_error("purge failed", err))?;
    let _ = queue.close_direct();

    print_action(
        &QueueAction {
            action: "purged",
            key: &args.key,
            count: Some(purged),
        },
        format,
    );
    Ok(SUCCESS)
}
