// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{handshake, Reply, Scripted, TrackingMemory};

use postern::backend::PlatformStatus;
use postern::client::State;
use postern::{
    Client, Error, ExitCallProvider, LoadOptions, SignalError, Source, UntrustedMemory,
    MAX_CREATE_ATTEMPTS,
};

use std::sync::atomic::Ordering;
use std::sync::Arc;

use wicket::message::{Reader, Writer};
use wicket::snapshot::{EnclaveOutput, ForkHandshakeConfig, Region, RegionKind, SnapshotLayout};
use wicket::status::{Code, Status};
use wicket::{CallIndex, Selector};

const ECHO: Selector = Selector::user(0);

fn options() -> LoadOptions {
    LoadOptions::new("test", Source::Bytes(b"image".to_vec()))
}

fn load(backend: &Arc<Scripted>, memory: &Arc<TrackingMemory>) -> postern::Result<Client> {
    Client::load(
        backend.clone(),
        options(),
        ExitCallProvider::new(),
        memory.clone() as Arc<dyn UntrustedMemory>,
    )
}

#[test]
fn create_retries_interrupted() {
    let memory = Arc::new(TrackingMemory::default());

    let backend = Scripted::new([PlatformStatus::ENCLAVE_CREATE_INTERRUPTED; 5], |_, _, _| {
        Reply::ok()
    });
    let err = load(&backend, &memory).unwrap_err();
    assert!(matches!(
        err,
        Error::Create(PlatformStatus::ENCLAVE_CREATE_INTERRUPTED)
    ));
    assert_eq!(backend.attempts.load(Ordering::SeqCst), MAX_CREATE_ATTEMPTS);

    let backend = Scripted::new([PlatformStatus::ENCLAVE_CREATE_INTERRUPTED; 2], |_, _, _| {
        Reply::ok()
    });
    let client = load(&backend, &memory).unwrap();
    assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(client.state(), State::Active);
}

#[test]
fn create_fails_fast() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([PlatformStatus::OUT_OF_MEMORY], |_, _, _| Reply::ok());

    let err = load(&backend, &memory).unwrap_err();
    assert!(matches!(err, Error::Create(PlatformStatus::OUT_OF_MEMORY)));
    assert_eq!(backend.attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn accessors() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::healthy();
    let client = load(&backend, &memory).unwrap();

    assert_eq!(client.name(), "test");
    assert_eq!(client.base_address(), 0x10_0000);
    assert_eq!(client.size(), 0x1000);
    assert!(!client.is_tcs_active());
    assert!(!client.is_closed());
}

#[test]
fn call_round_trip() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |index, selector, input| {
        assert_eq!(index, CallIndex::Dispatch);
        assert_eq!(selector, ECHO);
        Reply {
            output: Some(input.to_vec()),
            ..Default::default()
        }
    });
    let client = load(&backend, &memory).unwrap();

    let mut input = Writer::new();
    input.push(7u32);
    input.push_str("seven");
    input.push_bytes(b"");
    let mut reply = client.call(ECHO, Some(&input)).unwrap();

    assert_eq!(reply.next::<u32>(), Ok(7));
    assert_eq!(reply.next_string().unwrap(), "seven");
    assert!(reply.next_bytes().unwrap().is_empty());
    assert!(!reply.has_next());

    // Input and output buffers are both gone.
    assert_eq!(memory.live(), 0);
    assert_eq!(memory.allocs.load(Ordering::SeqCst), 2);
}

#[test]
fn call_without_input() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::healthy();
    let client = load(&backend, &memory).unwrap();

    let reply = client.call(ECHO, None).unwrap();
    assert!(reply.is_empty());
    assert!(client.call(ECHO, Some(&Writer::new())).unwrap().is_empty());

    assert_eq!(memory.allocs.load(Ordering::SeqCst), 0);
    for (_, _, input) in backend.inputs.lock().unwrap().iter() {
        assert!(input.is_empty());
    }
}

#[test]
fn call_failures() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |_, selector, _| match selector.0 {
        0x100 => Reply {
            transport: Some(PlatformStatus::ENCLAVE_CRASHED),
            output: Some(vec![1, 2, 3]),
            ..Default::default()
        },
        0x101 => Reply {
            retval: 1,
            output: Some(vec![1, 2, 3]),
            ..Default::default()
        },
        _ => Reply {
            output: Some(vec![1, 2, 3]),
            ..Default::default()
        },
    });
    let client = load(&backend, &memory).unwrap();

    let mut input = Writer::new();
    input.push(1u8);

    assert!(matches!(
        client.call(Selector::user(0), Some(&input)),
        Err(Error::Transport(PlatformStatus::ENCLAVE_CRASHED))
    ));
    assert!(matches!(
        client.call(Selector::user(1), Some(&input)),
        Err(Error::Internal("enclave call failed inside enclave"))
    ));
    assert!(matches!(
        client.call(Selector::user(2), None),
        Err(Error::Message(_))
    ));

    // Every buffer is released exactly once, whatever the outcome.
    assert_eq!(memory.live(), 0);
    assert_eq!(
        memory.allocs.load(Ordering::SeqCst),
        memory.frees.load(Ordering::SeqCst)
    );
}

#[test]
fn destroyed_client() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::healthy();
    let client = load(&backend, &memory).unwrap();

    client.destroy().unwrap();
    assert!(client.is_closed());
    assert_eq!(client.state(), State::Destroyed);
    assert!(backend.destroyed.load(Ordering::SeqCst));

    // The last entry was the teardown call.
    let inputs = backend.inputs.lock().unwrap().clone();
    assert_eq!(inputs.last().unwrap().1, Selector::FINALIZE);

    let ecalls = backend.ecalls.load(Ordering::SeqCst);
    assert!(matches!(client.call(ECHO, None), Err(Error::Closed)));
    assert!(matches!(
        client.deliver_signal(&Writer::new()),
        Err(Error::Closed)
    ));
    assert!(matches!(client.take_snapshot(), Err(Error::Closed)));
    assert!(matches!(client.destroy(), Err(Error::Closed)));
    assert_eq!(backend.ecalls.load(Ordering::SeqCst), ecalls);
}

#[test]
fn failed_teardown_keeps_enclave() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |_, selector, _| match selector {
        Selector::FINALIZE => Reply::retval(1),
        _ => Reply::ok(),
    });
    let client = load(&backend, &memory).unwrap();

    assert!(matches!(client.destroy(), Err(Error::Internal(_))));
    assert!(!backend.destroyed.load(Ordering::SeqCst));
    assert!(!client.is_closed());
}

#[test]
fn signal_classification() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |index, _, input| {
        assert_eq!(index, CallIndex::DeliverSignal);
        let mut reader = Reader::deserialize(input).unwrap();
        Reply::retval(reader.next::<i32>().unwrap())
    });
    let client = load(&backend, &memory).unwrap();

    let deliver = |code: i32| {
        let mut input = Writer::new();
        input.push(code);
        client.deliver_signal(&input)
    };

    let cases = [
        (1, Some(SignalError::Unregistered)),
        (2, Some(SignalError::BadState)),
        (-1, Some(SignalError::Blocked)),
        (3, Some(SignalError::Unexpected(3))),
        (0, None),
    ];

    for (code, expected) in cases {
        match (deliver(code), expected) {
            (Ok(()), None) => (),
            (Err(Error::Signal(e)), Some(expected)) => assert_eq!(e, expected),
            (result, _) => panic!("code {}: unexpected {:?}", code, result),
        }
    }

    assert!(SignalError::Blocked.is_transient());
    assert!(SignalError::BadState.is_transient());
    assert!(!SignalError::Unregistered.is_transient());
    assert_eq!(memory.live(), 0);
}

fn layout() -> SnapshotLayout {
    SnapshotLayout {
        regions: vec![Region {
            kind: RegionKind::Data,
            base: 0x1000,
            size: 0x2000,
        }],
        mac: vec![0xaa; 16],
    }
}

#[test]
fn snapshot_contract() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |index, selector, _| {
        assert_eq!(index, CallIndex::TakeSnapshot);
        assert_eq!(selector, Selector(0));
        Reply::enclave_output(&EnclaveOutput {
            status: Status::ok(),
            snapshot: Some(layout()),
        })
    });
    let client = load(&backend, &memory).unwrap();
    assert_eq!(client.take_snapshot().unwrap(), layout());
    assert_eq!(memory.live(), 0);
}

#[test]
fn snapshot_without_output() {
    let memory = Arc::new(TrackingMemory::default());

    for reply in [
        Reply::ok(),
        Reply::output(&Writer::new()),
        Reply {
            retval: 1,
            ..Reply::status(Status::ok())
        },
    ] {
        let backend = Scripted::new([], move |_, _, _| reply.clone());
        let client = load(&backend, &memory).unwrap();

        assert!(matches!(
            client.take_snapshot(),
            Err(Error::Internal("no output from enclave"))
        ));
    }

    assert_eq!(memory.live(), 0);
}

#[test]
fn snapshot_failures() {
    let memory = Arc::new(TrackingMemory::default());

    let backend = Scripted::new([], |_, _, _| {
        Reply::status(Status::new(Code::FailedPrecondition, "secure fork is disabled"))
    });
    let client = load(&backend, &memory).unwrap();
    match client.take_snapshot() {
        Err(Error::Enclave(status)) => assert_eq!(status.code, Code::FailedPrecondition),
        other => panic!("unexpected {:?}", other),
    }

    let backend = Scripted::new([], |_, _, _| Reply::transport(PlatformStatus::ENCLAVE_LOST));
    let client = load(&backend, &memory).unwrap();
    assert!(matches!(
        client.take_snapshot(),
        Err(Error::Transport(PlatformStatus::ENCLAVE_LOST))
    ));

    assert_eq!(memory.live(), 0);
}

#[test]
fn key_transfer() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |index, _, input| {
        assert_eq!(index, CallIndex::TransferSecureSnapshotKey);
        let mut reader = Reader::deserialize(input).unwrap();
        let config = ForkHandshakeConfig::decode(&mut reader).unwrap();
        match config.is_parent {
            true => Reply::status(Status::ok()),
            false => Reply::status(Status::new(Code::Unavailable, "no parent")),
        }
    });
    let client = load(&backend, &memory).unwrap();

    let parent = ForkHandshakeConfig {
        is_parent: true,
        socket: 4,
    };
    client.transfer_secure_snapshot_key(&parent).unwrap();

    let child = ForkHandshakeConfig {
        is_parent: false,
        socket: 4,
    };
    match client.transfer_secure_snapshot_key(&child) {
        Err(Error::Enclave(status)) => assert_eq!(status.code, Code::Unavailable),
        other => panic!("unexpected {:?}", other),
    }

    // A config that cannot be encoded never reaches the gate.
    let ecalls = backend.ecalls.load(Ordering::SeqCst);
    let invalid = ForkHandshakeConfig {
        is_parent: true,
        socket: -1,
    };
    assert!(matches!(
        client.transfer_secure_snapshot_key(&invalid),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(backend.ecalls.load(Ordering::SeqCst), ecalls);
    assert_eq!(memory.live(), 0);
}

#[test]
fn handshake_and_initialize() {
    let memory = Arc::new(TrackingMemory::default());
    let backend = Scripted::new([], |index, selector, _| handshake(index, selector));

    let mut options = options();
    options.config.enable_fork = true;
    options.config.host_name = "keep".into();
    let client = Client::load(
        backend.clone(),
        options,
        ExitCallProvider::new(),
        memory.clone(),
    )
    .unwrap();

    client.verify_abi().unwrap();
    client.initialize().unwrap();

    let inputs = backend.inputs.lock().unwrap().clone();
    let (_, selector, input) = inputs.last().unwrap();
    assert_eq!(*selector, Selector::INITIALIZE);

    let mut reader = Reader::deserialize(input).unwrap();
    let config = wicket::config::InitConfig::decode(&mut reader).unwrap();
    assert!(config.enable_fork);
    assert_eq!(config.host_name, "keep");
}
