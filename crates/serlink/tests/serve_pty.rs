#![cfg(all(target_os = "linux", feature = "cli"))]

use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serlink::frame::{encode_frame, FrameDecoder, FrameError};
use serlink::rpc::{Endpoint, Envelope, MessageKind, RpcError};
use serlink::transport::{SerialConfig, SerialPort, TransportError};

struct Pty {
    master: File,
    slave_path: String,
}

/// Allocate a pseudo-terminal with a non-blocking master side.
fn open_pty() -> Option<Pty> {
    // SAFETY: plain libc calls on a descriptor we own; the fd is handed to
    // `File` only once every call has succeeded.
    unsafe {
        let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        if fd < 0 {
            return None;
        }
        if libc::grantpt(fd) != 0 || libc::unlockpt(fd) != 0 {
            libc::close(fd);
            return None;
        }
        let name = libc::ptsname(fd);
        if name.is_null() {
            libc::close(fd);
            return None;
        }
        let slave_path = CStr::from_ptr(name).to_string_lossy().into_owned();
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        Some(Pty {
            master: File::from_raw_fd(fd),
            slave_path,
        })
    }
}

fn spawn_serve(device: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_serlink"))
        .env_remove("SERLINK_BAUD")
        .args(["--log-level", "error", "--format", "json", "serve", device])
        .args(["--duration", "10s"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start")
}

fn framed(envelope: &Envelope) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(&envelope.to_bytes().expect("valid envelope"), &mut buf)
        .expect("payload within limit");
    buf.to_vec()
}

/// Send `request` until a reply with its id comes back.
fn exchange(master: &mut File, request: &Envelope, timeout: Duration) -> Option<Envelope> {
    let wire = framed(request);
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::new();
    let deadline = Instant::now() + timeout;
    let mut next_send = Instant::now();

    while Instant::now() < deadline {
        if Instant::now() >= next_send {
            // The server may not have put the line into raw mode yet; resend.
            let _ = master.write_all(&wire);
            next_send = Instant::now() + Duration::from_millis(200);
        }

        let mut chunk = [0u8; 256];
        if let Ok(n) = master.read(&mut chunk) {
            buf.extend_from_slice(&chunk[..n]);
        }
        while let Some(payload) = decoder.decode(&mut buf) {
            let Ok(envelope) = Envelope::decode(payload) else {
                continue;
            };
            if envelope.kind.is_reply() && envelope.id == request.id {
                return Some(envelope);
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}

#[test]
fn serve_answers_requests_over_a_pty() {
    let Some(mut pty) = open_pty() else {
        eprintln!("skipping: no pseudo-terminal available");
        return;
    };
    let mut child = spawn_serve(&pty.slave_path);

    let sum = Envelope::new(MessageKind::Request, 7, "sum", vec![3u8, 4]);
    let reply = exchange(&mut pty.master, &sum, Duration::from_secs(5));

    let unknown = Envelope::new(MessageKind::Request, 8, "unknown", vec![1u8, 2]);
    let error = exchange(&mut pty.master, &unknown, Duration::from_secs(5));

    let _ = child.kill();
    let _ = child.wait();

    let reply = reply.expect("sum reply should arrive");
    assert_eq!(reply.kind, MessageKind::Response);
    assert_eq!(reply.name, "sum");
    assert_eq!(reply.payload.as_ref(), &[7]);

    let error = error.expect("error reply should arrive");
    assert_eq!(error.kind, MessageKind::Error);
    assert_eq!(error.name, "unknown");
    assert!(error.payload.is_empty());
}

#[test]
fn calls_on_an_undrained_line_give_up_after_the_write_timeout() {
    let Some(pty) = open_pty() else {
        eprintln!("skipping: no pseudo-terminal available");
        return;
    };
    let config = SerialConfig {
        write_timeout: Duration::from_millis(200),
        ..SerialConfig::default()
    };
    let endpoint = Arc::new(
        Endpoint::open(SerialPort::new(&pty.slave_path, config)).expect("pty slave should open"),
    );

    // Nothing reads the master side. Two callers contend for the writer.
    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let endpoint = Arc::clone(&endpoint);
        let tx = tx.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = endpoint.call("sum", &[1; 60_000], Duration::from_millis(200));
            let _ = tx.send((result, started.elapsed()));
        });
    }

    for _ in 0..2 {
        let (result, elapsed) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("call should return instead of blocking on the line");
        assert!(elapsed < Duration::from_secs(5));
        match result {
            Err(RpcError::Frame(FrameError::Transport(TransportError::Io(err)))) => {
                assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
            }
            other => panic!("expected a write timeout, got {other:?}"),
        }
    }

    drop(pty);
}
