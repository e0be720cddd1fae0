//! System V message queues (Linux).
//!
//! Addresses are the decimal queue key. Queues outlive the process that
//! created them, so an owning endpoint removes its queue on close and on
//! `Drop` unless ownership was explicitly released with
//! [`SysvQueue::release_ownership`].

use std::io;
use std::mem;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{parse_key, DirectTransport, DEFAULT_MAX_MSG_SIZE, GENERATE_ADDRESS};

const QUEUE_MODE: libc::c_int = 0o600;
const MAX_KEY_ATTEMPTS: usize = 32;
const PROC_SYSVIPC_MSG: &str = "/proc/sysvipc/msg";

/// Summary of a live queue as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub key: i64,
    pub msqid: i64,
    pub bytes: u64,
    pub messages: u64,
}

/// One endpoint of a System V message queue.
pub struct SysvQueue {
    address: String,
    msqid: Option<libc::c_int>,
    bound: bool,
    owner: bool,
    max_msg_size: usize,
}

impl SysvQueue {
    /// Endpoint for an existing queue key, or a new queue for [`GENERATE_ADDRESS`].
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            msqid: None,
            bound: false,
            owner: false,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }

    /// Endpoint that allocates (and owns) a new queue when bound.
    pub fn generate() -> Self {
        Self::new(GENERATE_ADDRESS)
    }

    /// Stop treating this endpoint as the owner so the queue survives close
    /// and drop. Returns the queue address if bound.
    pub fn release_ownership(&mut self) -> Option<String> {
        self.owner = false;
        self.bound.then(|| self.address.clone())
    }

    fn gone(&mut self) -> TransportError {
        self.msqid = None;
        TransportError::ResourceGone {
            address: self.address.clone(),
        }
    }

    fn allocate(&mut self) -> Result<()> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = random_key();
            // SAFETY: msgget has no pointer arguments.
            let msqid = unsafe { libc::msgget(key, libc::IPC_CREAT | libc::IPC_EXCL | QUEUE_MODE) };
            if msqid >= 0 {
                self.address = key.to_string();
                self.msqid = Some(msqid);
                self.owner = true;
                info!(key, msqid, "created system v queue");
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(TransportError::Os {
                    op: "msgget",
                    source: err,
                });
            }
        }
        Err(TransportError::Os {
            op: "msgget",
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free queue key"),
        })
    }

    fn stat(&mut self) -> Option<libc::msqid_ds> {
        let msqid = self.msqid?;
        // SAFETY: msqid_ds is a plain C struct for which all-zero is a valid value.
        let mut ds: libc::msqid_ds = unsafe { mem::zeroed() };
        // SAFETY: `ds` is a valid, writable msqid_ds for the duration of the call.
        let rc = unsafe { libc::msgctl(msqid, libc::IPC_STAT, &mut ds) };
        if rc == 0 {
            Some(ds)
        } else {
            debug!(address = %self.address, "queue stat failed, treating as closed");
            self.msqid = None;
            None
        }
    }
}

impl DirectTransport for SysvQueue {
    fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Ok(());
        }
        if self.address == GENERATE_ADDRESS {
            self.allocate()?;
        } else {
            parse_key(&self.address)?;
        }
        self.bound = true;
        Ok(())
    }

    fn open_direct(&mut self) -> Result<()> {
        if self.is_open_direct() {
            return Ok(());
        }
        self.bind()?;
        if self.msqid.is_some() {
            return Ok(());
        }
        let key = key_from_address(&self.address)?;
        // SAFETY: msgget has no pointer arguments.
        let msqid = unsafe { libc::msgget(key, 0) };
        if msqid < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOENT) => Err(self.gone()),
                _ => Err(TransportError::Os {
                    op: "msgget",
                    source: err,
                }),
            };
        }
        self.msqid = Some(msqid);
        debug!(address = %self.address, msqid, "opened system v queue");
        Ok(())
    }

    fn close_direct(&mut self) -> Result<()> {
        if self.owner {
            if let Some(msqid) = self.msqid.take() {
                remove_msqid(msqid)?;
                info!(address = %self.address, "removed system v queue");
            }
            self.owner = false;
        }
        self.msqid = None;
        self.bound = false;
        Ok(())
    }

    fn is_open_direct(&mut self) -> bool {
        self.stat().is_some()
    }

    fn send_direct(&mut self, payload: &[u8]) -> Result<bool> {
        if payload.len() > self.max_msg_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_msg_size,
            });
        }
        let Some(msqid) = self.msqid else {
            return Ok(false);
        };

        let mut buf = message_buffer(payload.len());
        buf[0] = 1;
        // SAFETY: `buf` holds one c_long header followed by at least
        // `payload.len()` bytes, and the regions do not overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                buf.as_mut_ptr().add(1).cast::<u8>(),
                payload.len(),
            );
        }
        // SAFETY: `buf` is a valid msgbuf (mtype + mtext) of the declared size.
        let rc = unsafe {
            libc::msgsnd(
                msqid,
                buf.as_ptr().cast::<libc::c_void>(),
                payload.len(),
                libc::IPC_NOWAIT,
            )
        };
        if rc == 0 {
            debug!(address = %self.address, bytes = payload.len(), "sent frame");
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Err(TransportError::TryAgain {
                address: self.address.clone(),
            }),
            Some(libc::EIDRM) | Some(libc::EINVAL) => Err(self.gone()),
            _ => Err(TransportError::Os {
                op: "msgsnd",
                source: err,
            }),
        }
    }

    fn recv_direct(&mut self) -> Result<Option<Bytes>> {
        let Some(msqid) = self.msqid else {
            return Err(TransportError::NotOpen(self.address.clone()));
        };

        let mut buf = message_buffer(self.max_msg_size);
        // SAFETY: `buf` has room for one c_long header plus `max_msg_size` bytes.
        let n = unsafe {
            libc::msgrcv(
                msqid,
                buf.as_mut_ptr().cast::<libc::c_void>(),
                self.max_msg_size,
                0,
                libc::IPC_NOWAIT,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOMSG) | Some(libc::EINTR) => Ok(None),
                Some(libc::EIDRM) | Some(libc::EINVAL) => Err(self.gone()),
                _ => Err(TransportError::Os {
                    op: "msgrcv",
                    source: err,
                }),
            };
        }

        let len = n as usize;
        // SAFETY: the kernel wrote `len` bytes of mtext right after the header.
        let data = unsafe { std::slice::from_raw_parts(buf.as_ptr().add(1).cast::<u8>(), len) };
        debug!(address = %self.address, bytes = len, "received frame");
        Ok(Some(Bytes::copy_from_slice(data)))
    }

    fn n_msg_direct_send(&mut self) -> usize {
        self.stat().map_or(0, |ds| ds.msg_qnum as usize)
    }

    fn purge(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.n_msg_direct_recv() > 0 {
            match self.recv_direct() {
                Ok(Some(_)) => count += 1,
                Ok(None) => break,
                Err(err) if err.is_gone() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(count)
    }

    fn address(&self) -> Option<&str> {
        if self.bound || self.address != GENERATE_ADDRESS {
            Some(&self.address)
        } else {
            None
        }
    }

    fn is_owner(&self) -> bool {
        self.owner
    }

    fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    fn transport_name(&self) -> &'static str {
        "sysv-queue"
    }
}

impl Drop for SysvQueue {
    fn drop(&mut self) {
        if self.owner {
            if let Some(msqid) = self.msqid.take() {
                debug!(address = %self.address, "removing owned queue on drop");
                if let Err(err) = remove_msqid(msqid) {
                    warn!(address = %self.address, %err, "failed to remove queue on drop");
                }
            }
        }
    }
}

/// List live queues visible to this process.
pub fn list_queues() -> Result<Vec<QueueInfo>> {
    let table = std::fs::read_to_string(PROC_SYSVIPC_MSG)?;
    Ok(parse_queue_table(&table))
}

/// Remove a queue by key, whoever created it.
pub fn remove_queue(address: &str) -> Result<()> {
    let key = key_from_address(address)?;
    // SAFETY: msgget has no pointer arguments.
    let msqid = unsafe { libc::msgget(key, 0) };
    if msqid < 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENOENT) => Err(TransportError::ResourceGone {
                address: address.to_string(),
            }),
            _ => Err(TransportError::Os {
                op: "msgget",
                source: err,
            }),
        };
    }
    remove_msqid(msqid)
}

fn remove_msqid(msqid: libc::c_int) -> Result<()> {
    // SAFETY: IPC_RMID ignores the buffer argument.
    let rc = unsafe { libc::msgctl(msqid, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Already gone: removal is idempotent.
        Some(libc::EIDRM) | Some(libc::EINVAL) => Ok(()),
        _ => Err(TransportError::Os {
            op: "msgctl",
            source: err,
        }),
    }
}

fn parse_queue_table(table: &str) -> Vec<QueueInfo> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let key = cols.next()?.parse().ok()?;
            let msqid = cols.next()?.parse().ok()?;
            let _perms = cols.next()?;
            let bytes = cols.next()?.parse().ok()?;
            let messages = cols.next()?.parse().ok()?;
            Some(QueueInfo {
                key,
                msqid,
                bytes,
                messages,
            })
        })
        .collect()
}

fn key_from_address(address: &str) -> Result<libc::key_t> {
    let key = parse_key(address)?;
    libc::key_t::try_from(key).map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

fn random_key() -> libc::key_t {
    let bits = uuid::Uuid::new_v4().as_u128();
    // Positive, non-zero, never IPC_PRIVATE.
    ((bits as u32) & 0x3fff_ffff) as libc::key_t + 1
}

fn message_buffer(payload_len: usize) -> Vec<libc::c_long> {
    let word = mem::size_of::<libc::c_long>();
    vec![0; 1 + payload_len.div_ceil(word)]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Some sandboxes refuse System V IPC entirely; skip rather than fail.
    fn owned_queue() -> Option<SysvQueue> {
        let mut queue = SysvQueue::generate();
        match queue.open_direct() {
            Ok(()) => Some(queue),
            Err(err) => {
                eprintln!("skipping system v test: {err}");
                None
            }
        }
    }

    #[test]
    fn send_recv_roundtrip() {
        let Some(mut owner) = owned_queue() else {
            return;
        };
        let mut client = SysvQueue::new(owner.address().unwrap());
        client.open_direct().unwrap();

        assert!(client.send_direct(b"hello").unwrap());
        assert_eq!(owner.n_msg_direct_recv(), 1);
        let frame = owner.recv_direct().unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(owner.recv_direct().unwrap().is_none());

        owner.close_direct().unwrap();
    }

    #[test]
    fn client_close_does_not_remove_queue() {
        let Some(mut owner) = owned_queue() else {
            return;
        };
        let mut client = SysvQueue::new(owner.address().unwrap());
        client.open_direct().unwrap();
        client.close_direct().unwrap();

        assert!(owner.is_open_direct());
        owner.close_direct().unwrap();
    }

    #[test]
    fn owner_close_reads_as_closed_for_client() {
        let Some(mut owner) = owned_queue() else {
            return;
        };
        let mut client = SysvQueue::new(owner.address().unwrap());
        client.open_direct().unwrap();

        owner.close_direct().unwrap();
        assert!(!client.is_open_direct());
        assert!(!client.send_direct(b"late").unwrap());
    }

    #[test]
    fn purge_drains_queue() {
        let Some(mut owner) = owned_queue() else {
            return;
        };
        owner.send_direct(b"a").unwrap();
        owner.send_direct(b"b").unwrap();
        assert_eq!(owner.purge().unwrap(), 2);
        assert_eq!(owner.n_msg_direct_recv(), 0);
        owner.close_direct().unwrap();
    }

    #[test]
    fn drop_removes_owned_queue() {
        let Some(owner) = owned_queue() else {
            return;
        };
        let address = owner.address().unwrap().to_string();
        drop(owner);

        let mut client = SysvQueue::new(address);
        assert!(client.open_direct().unwrap_err().is_gone());
    }

    #[test]
    fn released_queue_survives_drop() {
        let Some(mut owner) = owned_queue() else {
            return;
        };
        let address = owner.release_ownership().unwrap();
        drop(owner);

        let mut client = SysvQueue::new(address.clone());
        client.open_direct().unwrap();
        remove_queue(&address).unwrap();
        assert!(!client.is_open_direct());
    }

    #[test]
    fn parses_proc_table() {
        let table = "       key      msqid perms      cbytes       qnum lspid lrpid   uid   gid  cuid  cgid      stime      rtime      ctime\n\
                     1234567       3 600          10          2  100   101  1000  1000  1000  1000 0 0 0\n";
        let queues = parse_queue_table(table);
        assert_eq!(
            queues,
            vec![QueueInfo {
                key: 1234567,
                msqid: 3,
                bytes: 10,
                messages: 2,
            }]
        );
    }

    #[test]
    fn random_keys_are_positive() {
        for _ in 0..64 {
            assert!(random_key() > 0);
        }
    }
}
