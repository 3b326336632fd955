//! Framed request/response over a single TCP connection.
//!
//! One call = one connection: connect, write the request bytes, read until
//! a single NUL byte (discarding anything after it), close. Generalizes the
//! teacher's WebSocket roundtrip shape
//! (`examples/clawde-io-apps/daemon/src/cli/client.rs`) to this NUL-framed
//! TCP protocol.

use crate::error::ConnectionError;
use crate::retry;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// A request payload: either a pre-serialized byte/string form, or a JSON
/// object to be canonicalized (sorted keys) before sending.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Json(v)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

fn encode(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    match payload {
        Payload::Bytes(b) => Ok(b.clone()),
        Payload::Text(s) => Ok(s.as_bytes().to_vec()),
        Payload::Json(v) => {
            // Canonical form: keys sorted. serde_json::Value serializes map
            // keys in sorted order already (BTreeMap-backed when the
            // `preserve_order` feature is off, which it is here).
            serde_json::to_vec(v)
        }
    }
}

/// The decoded result of one [`roundtrip`] call: either the parsed JSON
/// value (`as_json = true`) or the raw UTF-8 response string.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Text(String),
}

impl Reply {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Reply::Json(v) => Some(v),
            Reply::Text(_) => None,
        }
    }
}

/// One framed request/response attempt: connect, write, read-until-NUL.
/// The whole attempt shares a single `timeout` budget.
async fn attempt(
    host: &str,
    port: u16,
    bytes: &[u8],
    as_json: bool,
    timeout: Duration,
) -> Result<Reply, String> {
    let connect = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| "timed out connecting".to_string())?
        .map_err(|e| format!("connect failed: {e}"))?;
    let mut stream = connect;

    tokio::time::timeout(timeout, stream.write_all(bytes))
        .await
        .map_err(|_| "timed out writing request".to_string())?
        .map_err(|e| format!("write failed: {e}"))?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = tokio::time::timeout(timeout, stream.read(&mut chunk))
            .await
            .map_err(|_| "timed out reading response".to_string())?
            .map_err(|e| format!("read failed: {e}"))?;

        if read == 0 {
            // Peer half-closed. Spec: partial data accumulated before a
            // half-close counts as "have data" only if the device actually
            // half-closes; we already have whatever was read so far.
            break;
        }

        if let Some(nul) = chunk[..read].iter().position(|&b| b == 0) {
            response.extend_from_slice(&chunk[..nul]);
            break;
        }
        response.extend_from_slice(&chunk[..read]);
    }

    let text = String::from_utf8(response).map_err(|e| format!("invalid utf-8 in reply: {e}"))?;

    if as_json {
        let value: Value =
            serde_json::from_str(&text).map_err(|e| format!("invalid json in reply: {e}"))?;
        Ok(Reply::Json(value))
    } else {
        Ok(Reply::Text(text))
    }
}

/// Send `payload` to `host:port` and return the decoded reply.
///
/// `as_json` defaults to `true` when `payload` is a JSON object/value and is
/// otherwise caller-controlled. Retries up to `retry + 1` total attempts,
/// sleeping `retry_delay` between attempts; fails with
/// [`ConnectionError::Timeout`] once attempts are exhausted. Every other
/// failure at this layer (connect refused, malformed reply bytes) is folded
/// into the same timeout/retry budget per spec §4.1: "network errors and
/// serialization errors are normalized into 'timeout' for the retry budget".
pub async fn roundtrip(
    host: &str,
    port: u16,
    payload: impl Into<Payload>,
    as_json: bool,
    timeout: Duration,
    retry: u32,
    retry_delay: Duration,
) -> Result<Reply, ConnectionError> {
    let payload = payload.into();
    let bytes = encode(&payload).map_err(|e| ConnectionError::MessageMalformed {
        address: (host.to_string(), port),
        reason: format!("failed to encode request payload: {e}"),
        reply: Value::Null,
    })?;

    let address = (host.to_string(), port);
    let result = retry::attempts_all(retry, retry_delay, || {
        let bytes = &bytes;
        async move {
            debug!(host, port, attempt = true, "wire roundtrip attempt");
            attempt(host, port, bytes, as_json, timeout).await
        }
    })
    .await;

    result.map_err(|reason| ConnectionError::Timeout { address, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    /// Spawn a one-shot echo server that replies with `response` (already
    /// NUL-terminated) to the first connection, then exits.
    async fn spawn_once(response: Vec<u8>) -> (String, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(&response).await;
        });
        (addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn roundtrip_decodes_json_and_stops_at_nul() {
        let mut reply = serde_json::to_vec(&serde_json::json!({
            "STATUS": [{"STATUS": "S", "Code": 22}],
            "id": 1,
            "VERSION": [{"API": "3.7"}],
        }))
        .unwrap();
        reply.push(0);
        reply.extend_from_slice(b"garbage-after-nul");
        let (host, port) = spawn_once(reply).await;

        let result = roundtrip(
            &host,
            port,
            serde_json::json!({"command": "version"}),
            true,
            Duration::from_secs(2),
            0,
            Duration::ZERO,
        )
        .await
        .unwrap();

        match result {
            Reply::Json(v) => {
                assert_eq!(v["id"], 1);
                assert_eq!(v["VERSION"][0]["API"], "3.7");
            }
            Reply::Text(_) => panic!("expected json"),
        }
    }

    #[tokio::test]
    async fn text_payload_passes_through_unchanged() {
        let mut reply = b"raw-reply".to_vec();
        reply.push(0);
        let (host, port) = spawn_once(reply).await;

        let result = roundtrip(
            &host,
            port,
            "ping",
            false,
            Duration::from_secs(2),
            0,
            Duration::ZERO,
        )
        .await
        .unwrap();

        match result {
            Reply::Text(t) => assert_eq!(t, "raw-reply"),
            Reply::Json(_) => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn connect_refused_times_out_after_retries_exhausted() {
        // Port 0 resolved to an unused port with nothing listening — connect
        // will fail immediately, which should still exhaust the retry
        // budget and surface as Timeout.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // nothing listening now

        let err = roundtrip(
            "127.0.0.1",
            addr.port(),
            serde_json::json!({"command": "version"}),
            true,
            Duration::from_millis(200),
            1,
            Duration::ZERO,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectionError::Timeout { .. }));
    }
}
