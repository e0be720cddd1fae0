use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use modelcomm_channel::{
    ClientComm, Comm, CommConfig, Direction, Message, RecvStatus, RetryConfig, ServerComm,
    TransportKind,
};
use modelcomm_schema::TypeRegistry;
use modelcomm_transport::{QueueConfig, QueueRegistry};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(3);

fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new().expect("builtin registry should compile"))
}

fn pair(kind: &TransportKind, typedef: Value) -> (Comm, Comm) {
    let registry = registry();
    let recv = Comm::new(
        kind,
        Arc::clone(&registry),
        CommConfig::new("inbound")
            .with_direction(Direction::Recv)
            .with_typedef(typedef.clone()),
    )
    .expect("receiver should open");
    let send = Comm::new(
        kind,
        registry,
        CommConfig::new("outbound")
            .with_address(recv.address())
            .with_typedef(typedef),
    )
    .expect("sender should connect");
    (send, recv)
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn eof_latches_receiver() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "unicode" }));

    assert!(send.send(&json!("last").into()).unwrap());
    assert!(send.send_eof().unwrap());

    assert_eq!(
        recv.recv_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!("last")))
    );
    assert_eq!(recv.recv_timeout(WAIT).unwrap(), RecvStatus::Eof);
    assert!(recv.eof_received());
    assert_eq!(recv.recv().unwrap(), RecvStatus::Closed);
}

#[test]
fn nolimit_eof_detected_on_both_paths() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "scalar", "subtype": "int" }));
    assert!(send.send_nolimit_eof().unwrap());
    assert!(recv.recv_nolimit_eof().unwrap());

    let (mut send, mut recv) = pair(&kind, json!({ "type": "scalar", "subtype": "int" }));
    assert!(send.send_eof().unwrap());
    assert!(recv.recv_nolimit_eof().unwrap());
}

#[test]
fn eof_reports_failure_flag_with_sentinel() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "unicode" }));
    assert!(send.send_eof().unwrap());
    assert!(wait_until(WAIT, || recv.n_msg() == 1));
    assert_eq!(recv.recv_flagged().unwrap(), (false, Some(Message::Eof)));

    let (mut send, mut recv) = pair(&kind, json!({ "type": "unicode" }));
    assert!(send.send_nolimit_eof().unwrap());
    assert!(wait_until(WAIT, || recv.n_msg() == 1));
    assert_eq!(recv.recv_nolimit_flagged().unwrap(), (false, Some(Message::Eof)));
}

#[test]
fn large_message_is_chunked_and_reassembled() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "unicode" }));
    let text = "modelcomm ".repeat(500);

    assert!(!send.send(&json!(text).into()).unwrap());
    assert!(send.send_nolimit(&json!(text).into()).unwrap());

    let status = recv.recv_nolimit_timeout(WAIT).unwrap();
    assert_eq!(status, RecvStatus::Received(Message::Value(json!(text))));
    assert_eq!(recv.recv().unwrap(), RecvStatus::Empty);
}

#[test]
fn purge_discards_pending_frames() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "boolean" }));
    for _ in 0..3 {
        assert!(send.send(&json!(true).into()).unwrap());
    }
    assert!(wait_until(WAIT, || recv.n_msg() == 3));
    assert_eq!(recv.purge(), 3);
    assert_eq!(recv.n_msg(), 0);
    assert!(send.confirm_send(WAIT));
}

fn tight_queue() -> TransportKind {
    TransportKind::Memory(QueueRegistry::with_config(QueueConfig {
        capacity_bytes: 2048,
        max_msg_size: 2048,
    }))
}

fn sender_with_retry(kind: &TransportKind, address: &str, retry: RetryConfig) -> Comm {
    Comm::new(
        kind,
        registry(),
        CommConfig::new("filler")
            .with_address(address)
            .with_typedef(json!({ "type": "unicode" }))
            .with_retry(retry),
    )
    .unwrap()
}

fn idle_receiver(kind: &TransportKind) -> Comm {
    Comm::new(
        kind,
        registry(),
        CommConfig::new("idle")
            .with_direction(Direction::Recv)
            .with_typedef(json!({ "type": "unicode" })),
    )
    .unwrap()
}

#[test]
fn full_queue_refuses_after_retry_cycle() {
    let kind = tight_queue();
    let recv = idle_receiver(&kind);
    let retry = RetryConfig {
        attempts: 3,
        backoff: Duration::from_millis(2),
    };
    let mut send = sender_with_retry(&kind, recv.address(), retry);
    let payload: Message = json!("q".repeat(1200)).into();

    let mut accepted = 0;
    let refused_after = loop {
        let start = Instant::now();
        if !send.send(&payload).unwrap() {
            break start.elapsed();
        }
        accepted += 1;
        assert!(accepted < 64, "an idle receiver absorbed every frame");
    };
    assert!(accepted > 0);
    assert!(refused_after >= Duration::from_millis(2 + 4 + 6));
    assert!(wait_until(WAIT, || recv.n_msg() == accepted));
}

#[test]
fn queue_drained_during_retries_accepts_send() {
    let kind = tight_queue();
    let mut recv = idle_receiver(&kind);
    let address = recv.address().to_string();
    let payload: Message = json!("d".repeat(1200)).into();

    let mut eager = sender_with_retry(&kind, &address, RetryConfig::none());
    let mut accepted = 0;
    while eager.send(&payload).unwrap() {
        accepted += 1;
        assert!(accepted < 64, "an idle receiver absorbed every frame");
    }

    let expected = accepted + 1;
    let reader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let mut received = 0;
        while received < expected {
            match recv.recv_timeout(WAIT).unwrap() {
                RecvStatus::Received(_) => received += 1,
                status => panic!("unexpected status {status:?}"),
            }
        }
        received
    });

    let patient = RetryConfig {
        attempts: 100,
        backoff: Duration::from_millis(2),
    };
    let mut send = sender_with_retry(&kind, &address, patient);
    assert!(send.send(&payload).unwrap());
    assert_eq!(reader.join().unwrap(), expected);
}

#[test]
fn close_handle_wakes_waiting_receiver() {
    let kind = TransportKind::memory();
    let (_send, mut recv) = pair(&kind, json!({ "type": "bytes" }));
    let handle = recv.close_handle();

    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.close();
    });
    let start = Instant::now();
    let status = recv.recv_timeout(Duration::from_secs(10)).unwrap();
    closer.join().unwrap();

    assert_eq!(status, RecvStatus::Closed);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(recv.is_closed());
}

#[test]
fn sender_sees_owner_close() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "bytes" }));
    recv.close();

    assert!(wait_until(WAIT, || send.is_closed()));
    assert!(!send.send(&Message::Raw("x".into())).unwrap());
}

#[test]
fn scheduled_receive_runs_in_background() {
    let kind = TransportKind::memory();
    let (mut send, recv) = pair(&kind, json!({ "type": "unicode" }));
    let recv = Arc::new(std::sync::Mutex::new(recv));

    let worker = Arc::clone(&recv);
    send.sched_task(Duration::from_millis(20), move || {
        let mut recv = worker.lock().unwrap();
        recv.recv_timeout(WAIT).unwrap().into_flagged()
    })
    .unwrap();
    assert!(send.sched_task(Duration::ZERO, || (true, None)).is_err());

    assert!(send.send(&json!("later").into()).unwrap());
    let (flag, message) = send.sched_out().unwrap();
    assert!(flag);
    assert_eq!(message, Some(Message::Value(json!("later"))));
    assert!(send.sched_out().is_none());
}

fn echo_server(kind: TransportKind, typedef: Value) -> (String, thread::JoinHandle<usize>) {
    let config = CommConfig::new("echo")
        .with_typedef(typedef)
        .with_reply_timeout(WAIT);
    let mut server = ServerComm::new(kind, registry(), config).expect("server should listen");
    let address = server.address().to_string();
    let handle = thread::spawn(move || {
        let mut answered = 0;
        loop {
            match server.rpc_recv_timeout(Duration::from_secs(10)).unwrap() {
                RecvStatus::Received(request) => {
                    assert!(server.rpc_send(&request).unwrap());
                    answered += 1;
                }
                RecvStatus::Eof => return answered,
                status => panic!("unexpected server status {status:?}"),
            }
        }
    });
    (address, handle)
}

#[test]
fn rpc_call_echoes_request() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "scalar", "subtype": "float" });
    let (address, server) = echo_server(kind.clone(), typedef.clone());

    let mut client = ClientComm::new(
        &kind,
        registry(),
        &address,
        CommConfig::new("caller").with_typedef(typedef),
    )
    .unwrap();
    assert_eq!(client.server_address(), address);

    let reply = client.rpc_call(&json!(1.5).into(), None).unwrap();
    assert_eq!(reply, RecvStatus::Received(Message::Value(json!(1.5))));
    let reply = client.rpc_call_nolimit(&json!(2.5).into(), None).unwrap();
    assert_eq!(reply, RecvStatus::Received(Message::Value(json!(2.5))));

    assert!(client.send_eof().unwrap());
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn rpc_large_payload_round_trip() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "unicode" });
    let (address, server) = echo_server(kind.clone(), typedef.clone());

    let mut client = ClientComm::new(
        &kind,
        registry(),
        &address,
        CommConfig::new("bulk").with_typedef(typedef),
    )
    .unwrap();
    let text = "y".repeat(6000);
    let reply = client.rpc_call(&json!(text).into(), Some(WAIT)).unwrap();
    assert_eq!(reply, RecvStatus::Received(Message::Value(json!(text))));

    assert!(client.send_eof().unwrap());
    assert_eq!(server.join().unwrap(), 1);
}

#[test]
fn replies_reach_only_their_client() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "unicode" });
    let (address, server) = echo_server(kind.clone(), typedef.clone());
    let connect = |name: &str| {
        ClientComm::new(
            &kind,
            registry(),
            &address,
            CommConfig::new(name).with_typedef(typedef.clone()),
        )
        .unwrap()
    };
    let mut alice = connect("alice");
    let mut bob = connect("bob");
    assert_ne!(alice.id(), bob.id());

    assert!(alice.rpc_send(&json!("for alice").into()).unwrap());
    assert_eq!(
        alice.rpc_recv_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!("for alice")))
    );
    assert_eq!(bob.rpc_recv().unwrap(), RecvStatus::Empty);

    let reply = bob.rpc_call(&json!("for bob").into(), None).unwrap();
    assert_eq!(reply, RecvStatus::Received(Message::Value(json!("for bob"))));
    assert_eq!(alice.rpc_recv().unwrap(), RecvStatus::Empty);

    assert!(alice.send_eof().unwrap());
    assert!(bob.send_eof().unwrap());
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn concurrent_chunked_requests_keep_their_payloads() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "unicode" });
    let (address, server) = echo_server(kind.clone(), typedef.clone());
    let patient = RetryConfig {
        attempts: 200,
        backoff: Duration::from_millis(1),
    };

    let clients: Vec<ClientComm> = (0..4)
        .map(|n| {
            ClientComm::new(
                &kind,
                registry(),
                &address,
                CommConfig::new(format!("worker-{n}"))
                    .with_typedef(typedef.clone())
                    .with_retry(patient),
            )
            .unwrap()
        })
        .collect();

    let workers: Vec<_> = clients
        .into_iter()
        .enumerate()
        .map(|(n, mut client)| {
            thread::spawn(move || {
                for round in 0..5 {
                    let text = format!("{n}:{round};").repeat(1500);
                    let reply = client.rpc_call(&json!(text).into(), Some(WAIT)).unwrap();
                    assert_eq!(reply, RecvStatus::Received(Message::Value(json!(text))));
                }
                assert!(client.send_eof().unwrap());
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(server.join().unwrap(), 20);
}

#[test]
fn server_reply_without_request_is_refused() {
    let kind = TransportKind::memory();
    let mut server = ServerComm::new(kind, registry(), CommConfig::new("idle")).unwrap();
    assert!(!server.rpc_send(&Message::Raw("x".into())).unwrap());
    assert_eq!(server.rpc_recv().unwrap(), RecvStatus::Empty);
    assert_eq!(server.pending_replies(), 0);
}

#[test]
fn server_reports_closed_after_last_client_finishes() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "boolean" });
    let mut server = ServerComm::new(
        kind.clone(),
        registry(),
        CommConfig::new("finisher").with_typedef(typedef.clone()),
    )
    .unwrap();
    let mut client = ClientComm::new(
        &kind,
        registry(),
        server.address(),
        CommConfig::new("last").with_typedef(typedef),
    )
    .unwrap();

    assert!(client.rpc_send(&json!(true).into()).unwrap());
    assert!(client.send_eof().unwrap());
    assert_eq!(
        server.rpc_recv_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!(true)))
    );
    assert!(server.rpc_send(&json!(true).into()).unwrap());

    assert_eq!(server.rpc_recv_timeout(WAIT).unwrap(), RecvStatus::Eof);
    assert!(server.eof_received());
    assert_eq!(server.rpc_recv().unwrap(), RecvStatus::Closed);
    assert_eq!(server.rpc_recv_timeout(WAIT).unwrap(), RecvStatus::Closed);
}

#[test]
fn reply_to_departed_client_is_dropped() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "boolean" });
    let mut server = ServerComm::new(
        kind.clone(),
        registry(),
        CommConfig::new("forgetful").with_typedef(typedef.clone()),
    )
    .unwrap();
    let mut client = ClientComm::new(
        &kind,
        registry(),
        server.address(),
        CommConfig::new("departing").with_typedef(typedef),
    )
    .unwrap();
    let short = Duration::from_millis(200);
    assert_eq!(server.rpc_recv_timeout(short).unwrap(), RecvStatus::TimedOut);
    assert_eq!(server.clients(), vec![client.id().to_string()]);

    assert!(client.rpc_send(&json!(false).into()).unwrap());
    client.close(true);
    assert_eq!(
        server.rpc_recv_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!(false)))
    );
    assert_eq!(server.rpc_recv_timeout(short).unwrap(), RecvStatus::TimedOut);
    assert_eq!(server.signed_off(), 1);

    assert_eq!(server.pending_replies(), 1);
    assert!(!server.rpc_send(&json!(false).into()).unwrap());
    assert_eq!(server.pending_replies(), 0);
    assert!(!server.is_closed());
}

#[test]
fn signoff_keeps_server_queue() {
    let kind = TransportKind::memory();
    let typedef = json!({ "type": "boolean" });
    let mut server = ServerComm::new(
        kind.clone(),
        registry(),
        CommConfig::new("keeper").with_typedef(typedef.clone()),
    )
    .unwrap();
    let address = server.address().to_string();

    let mut client = ClientComm::new(
        &kind,
        registry(),
        &address,
        CommConfig::new("leaver").with_typedef(typedef.clone()),
    )
    .unwrap();
    let short = Duration::from_millis(200);
    assert_eq!(server.rpc_recv_timeout(short).unwrap(), RecvStatus::TimedOut);
    assert_eq!(server.clients(), vec![client.id().to_string()]);

    client.close(true);
    assert!(client.is_closed());

    assert_eq!(server.rpc_recv_timeout(short).unwrap(), RecvStatus::TimedOut);
    assert!(server.clients().is_empty());
    assert_eq!(server.signed_off(), 1);
    assert!(!server.is_closed());

    let mut second = ClientComm::new(
        &kind,
        registry(),
        &address,
        CommConfig::new("stayer").with_typedef(typedef),
    )
    .unwrap();
    assert!(second.rpc_send(&json!(false).into()).unwrap());
    assert_eq!(
        server.rpc_recv_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!(false)))
    );
    assert_eq!(server.clients(), vec![second.id().to_string()]);
}

#[test]
fn client_sees_server_close() {
    let kind = TransportKind::memory();
    let mut server = ServerComm::new(kind.clone(), registry(), CommConfig::new("brief")).unwrap();
    let client = ClientComm::new(&kind, registry(), server.address(), CommConfig::new("late"))
        .unwrap();

    server.close();
    assert!(wait_until(WAIT, || client.is_closed()));
}

#[cfg(feature = "async")]
#[tokio::test]
async fn async_receive_polls_until_message() {
    let kind = TransportKind::memory();
    let (mut send, mut recv) = pair(&kind, json!({ "type": "unicode" }));

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        assert!(send.send(&json!("async").into()).unwrap());
        send
    });
    let status = recv.recv_async(WAIT).await.unwrap();
    assert_eq!(status, RecvStatus::Received(Message::Value(json!("async"))));
    drop(sender.join().unwrap());

    let status = recv.recv_nolimit_async(Duration::from_millis(50)).await.unwrap();
    assert_eq!(status, RecvStatus::TimedOut);
}

#[cfg(target_os = "linux")]
#[test]
fn sysv_round_trip_when_available() {
    let kind = TransportKind::Sysv;
    let registry = registry();
    let recv = Comm::new(
        &kind,
        Arc::clone(&registry),
        CommConfig::new("sysv-in")
            .with_direction(Direction::Recv)
            .with_typedef(json!({ "type": "unicode" })),
    );
    let Ok(mut recv) = recv else {
        eprintln!("skipping: System V queues unavailable");
        return;
    };
    let mut send = Comm::new(
        &kind,
        registry,
        CommConfig::new("sysv-out")
            .with_address(recv.address())
            .with_typedef(json!({ "type": "unicode" })),
    )
    .unwrap();

    let text = "z".repeat(3000);
    assert!(send.send_nolimit(&json!(text).into()).unwrap());
    assert_eq!(
        recv.recv_nolimit_timeout(WAIT).unwrap(),
        RecvStatus::Received(Message::Value(json!(text)))
    );
    recv.close();
}
