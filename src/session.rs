//! Session manager and the public per-device command executor (`rexec`).
//!
//! Composes the wire engine, message validator, command catalog, and
//! parameter normalizer: normalizes parameters, acquires a session token
//! when the catalog says the command needs one, issues the command, and
//! releases the session on every exit path.

use crate::catalog;
use crate::config::Config;
use crate::error::ConnectionError;
use crate::params::{self, Param};
use crate::retry;
use crate::validate::Envelope;
use crate::wire::{self, Reply};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Issue one command against a single device, handling session acquisition
/// and release transparently.
///
/// `logon`/`logoff` bypass session wrapping entirely — they *are* the
/// session protocol (spec §4.3).
pub async fn rexec(
    host: &str,
    port: u16,
    command: &str,
    parameters: Param,
    config: &Config,
) -> Result<Envelope, ConnectionError> {
    let mut args = parameters.normalize();

    if catalog::is_session_protocol_command(command) || !catalog::requires_session(command) {
        return retry::attempts_all(config.retries, config.retry_delay, || {
            send_once(host, port, command, &args, config.timeout)
        })
        .await;
    }

    let token = acquire_session(host, port, config).await?;
    args.insert(0, token.clone());

    let result = retry::attempts_all(config.retries, config.retry_delay, || {
        send_once(host, port, command, &args, config.timeout)
    })
    .await;

    // Best-effort release on every exit path, success or failure. Its own
    // failure is logged but never replaces the command's result (spec
    // §4.5: "attempt logoff exactly once, ignoring its failure").
    if let Err(e) = release_session(host, port, &token, config.timeout).await {
        warn!(host, port, error = %e, "logoff failed after command — session may leak");
    }

    result
}

/// Acquire a session token via `logon`, with its own retry budget
/// independent of the command body's. A `402` (already active) is never
/// retried.
async fn acquire_session(
    host: &str,
    port: u16,
    config: &Config,
) -> Result<String, ConnectionError> {
    let address = (host.to_string(), port);
    retry::attempts(
        config.retries,
        config.retry_delay,
        |e: &ConnectionError| !matches!(e, ConnectionError::SessionAlreadyActive { .. }),
        || {
            let address = address.clone();
            async move {
                // Use the unchecked parse here, not `send_once`: a
                // duplicate-logon reply carries STATUS[0].STATUS == "E"
                // *and* Code == 402, and the generic STATUS=="E" check in
                // `Envelope::validate` would turn it into a retriable
                // `MessageError` before `extract_session_id` ever gets to
                // inspect the code. The 402 check must run first.
                let envelope = send_once_unchecked(host, port, "logon", &[], config.timeout).await?;
                extract_session_id(&envelope, &address)
            }
        },
    )
    .await
}

fn extract_session_id(
    envelope: &Envelope,
    address: &(String, u16),
) -> Result<String, ConnectionError> {
    if let Some(first) = envelope.status.first() {
        if first.code == 402 {
            return Err(ConnectionError::SessionAlreadyActive {
                address: address.clone(),
            });
        }
    }
    let session = envelope
        .validate_field(address, "SESSION", 1, 1)?
        .ok_or_else(|| ConnectionError::MessageInvalid {
            address: address.clone(),
            field: "SESSION".to_string(),
            min: 1,
            max: 1,
            actual: 0,
            reply: Value::Null,
        })?;
    session
        .get("SessionID")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConnectionError::MessageMalformed {
            address: address.clone(),
            reason: "SESSION[0] missing SessionID".to_string(),
            reply: session,
        })
}

/// Release a session token. Never retried (spec §4.5: "it never retries
/// logoff").
async fn release_session(
    host: &str,
    port: u16,
    token: &str,
    timeout: Duration,
) -> Result<Envelope, ConnectionError> {
    send_once(host, port, "logoff", &[token.to_string()], timeout).await
}

/// A single wire attempt for one command: build the request, send it with
/// no internal retry (retry is the caller's concern), and parse the reply
/// into an [`Envelope`] without enforcing the blanket STATUS=="E" check.
///
/// `logon`'s 402 reply is itself a STATUS=="E" reply, so callers that need
/// to distinguish "already active" from every other device-rejected
/// command (i.e. [`acquire_session`]) must inspect the envelope before
/// that generic check runs — use [`send_once`] instead when no such
/// distinction is needed.
async fn send_once_unchecked(
    host: &str,
    port: u16,
    command: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Envelope, ConnectionError> {
    let address = (host.to_string(), port);
    let mut request = serde_json::Map::new();
    request.insert("command".to_string(), json!(command));
    if let Some(param) = params::join(args) {
        request.insert("parameter".to_string(), json!(param));
    }
    let request = Value::Object(request);

    debug!(host, port, command, "rexec attempt");
    let reply = wire::roundtrip(host, port, request, true, timeout, 0, Duration::ZERO).await?;
    let raw = match reply {
        Reply::Json(v) => v,
        Reply::Text(t) => {
            return Err(ConnectionError::MessageMalformed {
                address: address.clone(),
                reason: "expected json reply".to_string(),
                reply: Value::String(t),
            })
        }
    };
    Envelope::parse(&address, raw)
}

/// A single wire attempt for one command: build the request, send it with
/// no internal retry (retry is the caller's concern), parse, and apply
/// envelope-level validation.
async fn send_once(
    host: &str,
    port: u16,
    command: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Envelope, ConnectionError> {
    let address = (host.to_string(), port);
    let envelope = send_once_unchecked(host, port, command, args, timeout).await?;
    envelope.validate(&address)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A tiny scripted device: replies with each entry in `scripts` in
    /// order, one per accepted connection.
    async fn spawn_scripted(scripts: Vec<Value>) -> (String, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for script in scripts {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let mut bytes = serde_json::to_vec(&script).unwrap();
                bytes.push(0);
                let _ = sock.write_all(&bytes).await;
            }
        });
        (addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn single_shot_version() {
        let (host, port) = spawn_scripted(vec![json!({
            "STATUS": [{"STATUS": "S", "Code": 22}],
            "id": 1,
            "VERSION": [{"API": "3.7"}],
        })])
        .await;

        let config = Config::for_tests();
        let env = rexec(&host, port, "version", Param::none(), &config)
            .await
            .unwrap();
        let address = (host.clone(), port);
        let version = env
            .validate_field(&address, "VERSION", 1, 1)
            .unwrap()
            .unwrap();
        assert_eq!(version["API"], "3.7");
    }

    #[tokio::test]
    async fn session_round_trip_prepends_token_and_logs_off() {
        let (host, port) = spawn_scripted(vec![
            json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 1, "SESSION": [{"SessionID": "abc"}]}),
            json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 2, "PROFILE": [{"Profile Name": "fast"}]}),
            json!({"STATUS": [{"STATUS": "S", "Code": 22}], "id": 3}),
        ])
        .await;

        let config = Config::for_tests();
        let env = rexec(
            &host,
            port,
            "profileset",
            Param::list(vec!["board0", "fast"]),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(env.id, 2);
    }

    #[tokio::test]
    async fn duplicate_logon_raises_session_already_active_without_retry() {
        let (host, port) = spawn_scripted(vec![json!({
            "STATUS": [{"STATUS": "E", "Code": 402, "Msg": "Another session is active"}],
            "id": 1,
        })])
        .await;

        let mut config = Config::for_tests();
        config.retries = 3;
        let err = rexec(
            &host,
            port,
            "profileset",
            Param::list(vec!["b", "p"]),
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::SessionAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        // First connection accepts the request then closes without
        // replying (empty/invalid response, folded into the retry budget
        // like a timeout); the second connection replies correctly. With
        // retry=1 this must still succeed.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;
            drop(sock); // no reply — client read times out

            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock.read(&mut buf).await;
            let mut bytes = serde_json::to_vec(&json!({
                "STATUS": [{"STATUS": "S", "Code": 22}],
                "id": 1,
                "VERSION": [{"API": "3.7"}],
            }))
            .unwrap();
            bytes.push(0);
            let _ = sock.write_all(&bytes).await;
        });

        let mut config = Config::for_tests();
        config.retries = 1;
        config.timeout = Duration::from_millis(300);
        let env = rexec(
            "127.0.0.1",
            addr.port(),
            "version",
            Param::none(),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(env.id, 1);
    }

    #[tokio::test]
    async fn no_retry_raises_timeout_against_unreachable_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = Config::for_tests();
        config.retries = 0;
        config.timeout = Duration::from_millis(200);
        let err = rexec(
            "127.0.0.1",
            addr.port(),
            "version",
            Param::none(),
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout { .. }));
    }
}
