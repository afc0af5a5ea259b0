//! Raw TCP protocol adapter.
//!
//! Frames a byte stream per the imposter's `mode` (`"text"`: newline
//! delimited; `"binary"`: read until the connection idles) and feeds the
//! assembled frame through the same stub matching/behavior pipeline the
//! HTTP adapter uses. The matched response's bytes are written back
//! verbatim (base64-decoded first when the response itself is `_mode:
//! "binary"`).

use crate::behaviors::{
    apply_copy_behaviors, apply_lookup_behaviors, global_csv_cache, RequestContext,
    ResponseBehaviors,
};
use crate::imposter::{apply_js_or_rhai_decorate, Imposter, ResponseMode};
use base64::Engine;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Maximum time to wait for a complete frame before giving up on the
/// connection, matching the §5 30s read deadline.
const READ_DEADLINE: Duration = Duration::from_secs(30);
/// How long a binary-mode read has to go quiet before a frame is considered
/// complete.
const BINARY_IDLE_GAP: Duration = Duration::from_millis(200);

pub async fn serve(
    imposter: Arc<Imposter>,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let imposter = Arc::clone(&imposter);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, imposter).await {
                                debug!("tcp connection error on {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("tcp accept error: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    imposter: Arc<Imposter>,
) -> std::io::Result<()> {
    let binary = imposter.config.mode.as_deref() == Some("binary");

    loop {
        let data = match tokio::time::timeout(READ_DEADLINE, read_frame(&mut stream, binary)).await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return Ok(()), // clean EOF
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()), // idle past the read deadline
        };

        imposter.increment_request_count();

        let body_text = if binary {
            base64::engine::general_purpose::STANDARD.encode(&data)
        } else {
            String::from_utf8_lossy(&data).to_string()
        };

        let response = process_frame(&imposter, &body_text, addr, binary).await;
        if !response.is_empty() {
            stream.write_all(&response).await?;
        }
    }
}

/// Read one frame: a newline-delimited line in text mode, or everything
/// available until the socket goes quiet in binary mode.
async fn read_frame(stream: &mut TcpStream, binary: bool) -> std::io::Result<Option<Vec<u8>>> {
    if binary {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match tokio::time::timeout(BINARY_IDLE_GAP, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Ok(if buf.is_empty() { None } else { Some(buf) });
                }
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    if buf.is_empty() {
                        continue;
                    }
                    return Ok(Some(buf));
                }
            }
        }
    } else {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).await? {
                0 => return Ok(if buf.is_empty() { None } else { Some(buf) }),
                _ if byte[0] == b'\n' => return Ok(Some(buf)),
                _ => buf.push(byte[0]),
            }
        }
    }
}

async fn process_frame(
    imposter: &Imposter,
    body_text: &str,
    addr: SocketAddr,
    binary: bool,
) -> Vec<u8> {
    let headers_for_context = hyper::HeaderMap::new();
    let request_from = addr.to_string();
    let client_ip = addr.ip().to_string();

    let matched = imposter.find_matching_stub_with_client(
        "TCP",
        "/",
        &headers_for_context,
        None,
        Some(body_text),
        Some(&request_from),
        Some(&client_ip),
    );

    let Some((stub, stub_index)) = matched else {
        return Vec::new();
    };

    let Some((status, mut headers, mut body, behaviors, _ext_ext, response_mode, is_fault)) =
        imposter.execute_stub_with_ext(&stub, stub_index)
    else {
        return Vec::new();
    };

    if is_fault {
        // A connection-level fault for a raw TCP imposter means "don't
        // answer" rather than synthesizing an HTTP-shaped error body.
        return Vec::new();
    }

    if let Some(behaviors_json) = behaviors {
        if let Ok(parsed) = serde_json::from_value::<ResponseBehaviors>(behaviors_json) {
            if let Some(ref wait) = parsed.wait {
                match wait.resolve_ms() {
                    Ok(wait_ms) if wait_ms > 0 => {
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // wait-invalid: no well-formed error payload exists on a
                        // raw TCP socket, so the request fails by closing without
                        // a response, mirroring the fault path above.
                        warn!("wait-invalid on TCP imposter: {}", err);
                        return Vec::new();
                    }
                }
            }

            let request_context = RequestContext::plain(
                "TCP",
                "/",
                HashMap::new(),
                HashMap::new(),
                Some(body_text),
            );

            if !parsed.copy.is_empty() {
                body = apply_copy_behaviors(&body, &mut headers, &parsed.copy, &request_context);
            }

            if !parsed.lookup.is_empty() {
                body = apply_lookup_behaviors(
                    &body,
                    &mut headers,
                    &parsed.lookup,
                    &request_context,
                    global_csv_cache(),
                );
            }

            if let Some(ref decorate_script) = parsed.decorate {
                match apply_js_or_rhai_decorate(
                    decorate_script,
                    &request_context,
                    &body,
                    status,
                    &mut headers,
                ) {
                    Ok((new_body, _new_status)) => body = new_body,
                    Err(err) => {
                        // script-error on decorate fails the request (§4.4, §7); a
                        // raw TCP socket has no error payload, so it closes instead.
                        warn!("decorate script error on TCP imposter: {}", err);
                        return Vec::new();
                    }
                }
            }
        }
    }

    let _ = binary; // response framing follows the response's own `_mode`, not the request's
    match response_mode {
        ResponseMode::Binary => base64::engine::general_purpose::STANDARD
            .decode(&body)
            .unwrap_or_else(|_| body.into_bytes()),
        ResponseMode::Text => body.into_bytes(),
    }
}
