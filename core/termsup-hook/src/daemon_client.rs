//! Client helper for talking to the termsup daemon.
//!
//! The daemon owns all pane state. A failed send is reported to the caller;
//! there is no local fallback.

use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use termsup_daemon_protocol::{
    ContentEnvelope, EventEnvelope, Method, Request, Response, MAX_REQUEST_BYTES,
};

const ENABLE_ENV: &str = "TERMSUP_DAEMON_ENABLED";
const SOCKET_ENV: &str = "TERMSUP_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

pub fn send_event(envelope: &EventEnvelope) -> Result<Value, String> {
    let params = serde_json::to_value(envelope)
        .map_err(|err| format!("Failed to serialize event: {}", err))?;
    call_with_retry(Method::Event, Some(params), "event")
}

pub fn send_content(envelope: &ContentEnvelope) -> Result<Value, String> {
    let params = serde_json::to_value(envelope)
        .map_err(|err| format!("Failed to serialize content: {}", err))?;
    call_with_retry(Method::Content, Some(params), "content")
}

pub fn set_focus(pane_id: Option<&str>) -> Result<Value, String> {
    call_with_retry(
        Method::SetFocus,
        Some(serde_json::json!({ "pane_id": pane_id })),
        "focus",
    )
}

pub fn get_status(pane_id: &str) -> Result<Value, String> {
    call(
        Method::GetStatus,
        Some(serde_json::json!({ "pane_id": pane_id })),
    )
}

fn call(method: Method, params: Option<Value>) -> Result<Value, String> {
    if !daemon_enabled() {
        return Err("Daemon disabled".to_string());
    }
    let response = send_request(Request::new(method, params))?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}

fn call_with_retry(method: Method, params: Option<Value>, label: &str) -> Result<Value, String> {
    match call(method, params.clone()) {
        Ok(data) => Ok(data),
        Err(err) if err == "Daemon disabled" => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            call(method, params).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
                retry_err
            })
        }
    }
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".termsup").join(SOCKET_NAME))
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::os::unix::net::UnixListener;
    use std::sync::{Arc, Mutex, OnceLock};
    use std::time::Instant;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        key: &'static str,
        prior: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prior = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prior }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prior {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_request(stream: &mut UnixStream) -> Option<Request> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.contains(&b'\n') {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }
        let newline_index = buffer.iter().position(|b| *b == b'\n')?;
        serde_json::from_slice(&buffer[..newline_index]).ok()
    }

    /// Serves `responses` in order, one per connection, and records every
    /// request it saw.
    fn spawn_fake_daemon(
        socket_path: PathBuf,
        responses: Vec<Response>,
    ) -> (std::thread::JoinHandle<()>, Arc<Mutex<Vec<Request>>>) {
        let listener = UnixListener::bind(&socket_path).unwrap();
        listener.set_nonblocking(true).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let server = std::thread::spawn(move || {
            let start = Instant::now();
            let mut responses = responses.into_iter();
            while start.elapsed() < Duration::from_secs(5) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        if let Some(request) = read_request(&mut stream) {
                            seen_clone.lock().unwrap().push(request);
                        }
                        let Some(response) = responses.next() else {
                            break;
                        };
                        let mut payload = serde_json::to_vec(&response).unwrap();
                        payload.push(b'\n');
                        let _ = stream.write_all(&payload);
                        if responses.len() == 0 {
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });
        (server, seen)
    }

    fn event(pane_id: &str) -> EventEnvelope {
        EventEnvelope {
            source: "shell".to_string(),
            pane_id: pane_id.to_string(),
            event_type: "command_start".to_string(),
            payload: Map::new(),
        }
    }

    #[test]
    fn send_event_retries_after_daemon_error() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");

        let (server, seen) = spawn_fake_daemon(
            socket_path.clone(),
            vec![
                Response::error(None, "test_error", "simulated"),
                Response::ok(None, serde_json::json!({"accepted": true})),
            ],
        );

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "1");

        let data = send_event(&event("%3")).expect("retry succeeds");
        server.join().unwrap();

        assert_eq!(data["accepted"], true);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, Method::Event);
        assert_eq!(
            seen[1].params.as_ref().and_then(|params| params.get("pane_id")),
            Some(&serde_json::json!("%3"))
        );
    }

    #[test]
    fn disabled_daemon_short_circuits() {
        let _guard = env_lock();
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "0");

        assert_eq!(send_event(&event("%1")).unwrap_err(), "Daemon disabled");
        assert_eq!(set_focus(Some("%1")).unwrap_err(), "Daemon disabled");
    }

    #[test]
    fn missing_socket_reports_connect_error() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let _socket_guard = EnvGuard::set(
            SOCKET_ENV,
            dir.path().join("absent.sock").to_str().unwrap(),
        );
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "1");

        let err = get_status("%1").unwrap_err();
        assert!(err.starts_with("Failed to connect to daemon socket"));
    }
}
