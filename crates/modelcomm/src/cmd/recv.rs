use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use modelcomm_channel::{Message, TransportKind};
use modelcomm_frame::{Assembled, Envelope, Reassembler};
use modelcomm_schema::{Serializer, TypeRegistry};
use modelcomm_transport::DirectTransport;

use crate::cmd::{parse_duration, parse_typedef, RecvArgs};
use crate::exit::{
    frame_error, schema_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT,
};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reads frames straight from the queue rather than through a worker so
/// nothing beyond `--count` messages is taken off the queue.
pub fn run(args: RecvArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let typedef = parse_typedef(&args.typedef)?;
    let registry = Arc::new(TypeRegistry::new().map_err(|err| schema_error("registry", err))?);
    let serializer =
        Serializer::new(registry, typedef).map_err(|err| schema_error("invalid typedef", err))?;

    let mut queue = TransportKind::Sysv
        .endpoint(&args.key)
        .map_err(|err| transport_error("open failed", err))?;
    queue
        .open_direct()
        .map_err(|err| transport_error("open failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut reassembler = Reassembler::new();
    let mut received = 0usize;
    while running.load(Ordering::SeqCst) {
        let next = next_envelope(
            queue.as_mut(),
            &mut reassembler,
            &serializer,
            timeout,
            &running,
        )?;
        let Some(envelope) = next else {
            if received == 0 && running.load(Ordering::SeqCst) {
                let _ = queue.close_direct();
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no message on {} within {timeout:?}", args.key),
                ));
            }
            break;
        };
        let (message, metadata) = serializer
            .deserialize_envelope(envelope)
            .map_err(|err| schema_error("decode failed", err))?;
        if message == Message::Eof {
            tracing::info!(key = %args.key, "end of stream");
            break;
        }
        print_message(&message, &metadata, &args.key, format);
        received += 1;
        if args.count.is_some_and(|count| received >= count) {
            break;
        }
    }

    let _ = queue.close_direct();
    Ok(SUCCESS)
}

/// Poll until one whole envelope has arrived. `None` on timeout, on
/// interrupt, or when the queue has been removed.
fn next_envelope(
    queue: &mut dyn DirectTransport,
    reassembler: &mut Reassembler,
    serializer: &Serializer,
    timeout: Duration,
    running: &AtomicBool,
) -> CliResult<Option<Envelope>> {
    let mode = serializer.framing_mode();
    let mut deadline = Instant::now() + timeout;
    while running.load(Ordering::SeqCst) {
        let frame = match queue.recv_direct() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(err) if err.is_gone() => {
                tracing::info!("queue removed");
                return Ok(None);
            }
            Err(err) => return Err(transport_error("receive failed", err)),
        };
        match reassembler
            .push(frame, mode)
            .map_err(|err| frame_error("bad frame", err))?
        {
            Assembled::Complete(envelope) => return Ok(Some(envelope)),
            Assembled::Partial { received, expected } => {
                tracing::debug!(received, expected, "awaiting continuation frame");
                deadline = Instant::now() + timeout;
            }
        }
    }
    Ok(None)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
