use crate::cmd::RmArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

/// Removes every key given; the first failure's code is returned after
/// the remaining keys have been tried.
#[cfg(target_os = "linux")]
pub fn run(args: RmArgs, format: OutputFormat) -> CliResult<i32> {
    use modelcomm_transport::sysv::remove_queue;

    use crate::exit::{transport_error, SUCCESS};
    use crate::output::{print_action, QueueAction};

    let mut first_error = None;
    for key in &args.keys {
        match remove_queue(key) {
            Ok(()) => print_action(
                &QueueAction {
                    action: "removed",
                    key,
                    count: None,
                },
                format,
            ),
            Err(err) => {
                let err = transport_error(&format!("rm {key}"), err);
                eprintln!("error: {err}");
                first_error.get_or_insert(err.code);
            }
        }
    }
    Ok(first_error.unwrap_or(SUCCESS))
}

#[cfg(not(target_os = "linux"))]
pub fn run(_args: RmArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::UNSUPPORTED,
        "rm: System V queues are only available on Linux",
    ))
}
