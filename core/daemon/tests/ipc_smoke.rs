use serde_json::json;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use termsup_daemon_protocol::{Method, Request, Response, PROTOCOL_VERSION};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_termsup-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn termsup-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".termsup").join("daemon.sock")
}

fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_raw(socket: &Path, bytes: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(bytes).expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_request(socket: &Path, method: Method, params: serde_json::Value) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("{:?}", method).to_lowercase()),
        params: Some(params),
    };
    let mut bytes = serde_json::to_vec(&request).expect("Failed to serialize request");
    bytes.push(b'\n');
    send_raw(socket, &bytes)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn start(home: &TempDir) -> Option<(DaemonGuard, PathBuf)> {
    if !can_bind_socket(home.path()) {
        eprintln!("Skipping daemon IPC test: sandbox forbids unix sockets");
        return None;
    }
    let socket = socket_path(home.path());
    let guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(2));
    Some((guard, socket))
}

#[test]
fn daemon_ipc_event_flow_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let Some((_guard, socket)) = start(&home) else {
        return;
    };

    let health = send_request(&socket, Method::GetHealth, json!({}));
    assert!(health.ok, "health response was not ok");
    let health_data = health.data.expect("health payload");
    assert_eq!(health_data["status"], "ok");
    assert_eq!(health_data["protocol_version"], PROTOCOL_VERSION);
    assert_eq!(health_data["adapter"], "none");

    let start_event = send_request(
        &socket,
        Method::Event,
        json!({
            "source": "shell",
            "pane_id": "%7",
            "event_type": "command_start",
            "payload": {"command": "cargo build"}
        }),
    );
    assert!(start_event.ok, "command_start response was not ok");
    assert_eq!(start_event.data.expect("event payload")["accepted"], true);

    let status = send_request(&socket, Method::GetStatus, json!({"pane_id": "%7"}));
    let status_data = status.data.expect("status payload");
    assert_eq!(status_data["status"], "RUNNING");
    assert_eq!(status_data["source"], "shell");
    assert_eq!(status_data["description"], "Running: cargo build");

    let end_event = send_request(
        &socket,
        Method::Event,
        json!({
            "source": "shell",
            "pane_id": "%7",
            "event_type": "command_end",
            "payload": {"exit_code": 1}
        }),
    );
    assert!(end_event.ok, "command_end response was not ok");

    let status = send_request(&socket, Method::GetStatus, json!({"pane_id": "%7"}));
    assert_eq!(status.data.expect("status payload")["status"], "FAILED");

    let snapshot = send_request(
        &socket,
        Method::GetSnapshot,
        json!({"pane_id": "%7", "max_history": 5}),
    );
    let snapshot_data = snapshot.data.expect("snapshot payload");
    assert_eq!(snapshot_data["pane_id"], "%7");
    assert_eq!(
        snapshot_data["history"].as_array().map(|history| history.len()),
        Some(2)
    );

    let listing = send_request(&socket, Method::ListSnapshots, json!({"limit": 10}));
    let listing_data = listing.data.expect("listing payload");
    assert_eq!(listing_data["total"], 1);

    let removed = send_request(&socket, Method::RemovePane, json!({"pane_id": "%7"}));
    assert_eq!(removed.data.expect("remove payload")["removed"], true);

    let status = send_request(&socket, Method::GetStatus, json!({"pane_id": "%7"}));
    assert_eq!(status.data.expect("status payload")["found"], false);
}

#[test]
fn daemon_ipc_rejects_malformed_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let Some((_guard, socket)) = start(&home) else {
        return;
    };

    let invalid_json = send_raw(&socket, b"{not json}\n");
    assert!(!invalid_json.ok);
    assert_eq!(invalid_json.error.expect("error").code, "invalid_json");

    let empty = send_raw(&socket, b"   \n");
    assert_eq!(empty.error.expect("error").code, "empty_request");

    let unknown_field = send_request(
        &socket,
        Method::Event,
        json!({
            "source": "shell",
            "pane_id": "%1",
            "event_type": "command_start",
            "extra": true
        }),
    );
    assert_eq!(unknown_field.error.expect("error").code, "invalid_params");

    let blank_source = send_request(
        &socket,
        Method::Event,
        json!({"source": "  ", "pane_id": "%1", "event_type": "command_start"}),
    );
    assert_eq!(blank_source.error.expect("error").code, "missing_field");

    let bumped = send_request(&socket, Method::BumpGeneration, json!({"pane_id": "%1"}));
    assert_eq!(bumped.data.expect("bump payload")["generation"], 1);

    let oversized_limit = send_request(&socket, Method::ListSnapshots, json!({"limit": 100_000}));
    assert_eq!(oversized_limit.error.expect("error").code, "invalid_limit");

    let health = send_request(&socket, Method::GetHealth, json!({}));
    assert!(health.ok, "daemon stayed up after malformed requests");
}
