use crate::cmd::CreateArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(target_os = "linux")]
pub fn run(_args: CreateArgs, format: OutputFormat) -> CliResult<i32> {
    use modelcomm_transport::{DirectTransport, SysvQueue};

    use crate::exit::{transport_error, CliError, INTERNAL, SUCCESS};
    use crate::output::{print_action, QueueAction};

    let mut queue = SysvQueue::generate();
    queue
        .open_direct()
        .map_err(|err| transport_error("create failed", err))?;
    let key = queue
        .release_ownership()
        .ok_or_else(|| CliError::new(INTERNAL, "create failed: queue was not bound"))?;
    tracing::info!(key = %key, "queue created");

    print_action(
        &QueueAction {
            action: "created",
            key: &key,
            count: None,
        },
        format,
    );
    Ok(SUCCESS)
}

#[cfg(not(target_os = "linux"))]
pub fn run(_args: CreateArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::UNSUPPORTED,
        "create: System V queues are only available on Linux",
    ))
}
