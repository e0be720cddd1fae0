use crate::cmd::LsArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(target_os = "linux")]
pub fn run(_args: LsArgs, format: OutputFormat) -> CliResult<i32> {
    use modelcomm_transport::sysv::list_queues;

    use crate::exit::{transport_error, SUCCESS};
    use crate::output::{print_queues, QueueRow};

    let rows: Vec<QueueRow> = list_queues()
        .map_err(|err| transport_error("listing queues failed", err))?
        .into_iter()
        .map(|info| QueueRow {
            key: info.key.to_string(),
            msqid: info.msqid,
            messages: info.messages,
            bytes: info.bytes,
        })
        .collect();
    print_queues(&rows, format);
    Ok(SUCCESS)
}

#[cfg(not(target_os = "linux"))]
pub fn run(_args: LsArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::UNSUPPORTED,
        "ls: System V queues are only available on Linux",
    ))
}
