//! Minimal SMTP protocol adapter.
//!
//! Implements just enough of the RFC 5321 command/response dance (HELO/EHLO,
//! MAIL FROM, RCPT TO, DATA, `.` terminator, QUIT) to assemble an envelope
//! and a naive MIME body into the shared request record, match it against
//! an imposter's stubs, and answer with the matched response's status
//! mapped onto an SMTP reply code. This is a virtualization stub, not a
//! mail server: no multipart MIME parsing, no STARTTLS, no AUTH.

use crate::behaviors::{
    apply_copy_behaviors, apply_lookup_behaviors, global_csv_cache, RequestContext,
    ResponseBehaviors,
};
use crate::imposter::{apply_js_or_rhai_decorate, Imposter, ResponseMode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error};

const READ_DEADLINE: Duration = Duration::from_secs(30);

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
                            if let Err(e) = handle_session(stream, addr, imposter).await {
                                debug!("smtp session error on {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("smtp accept error: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

#[derive(Default)]
struct Envelope {
    from: String,
    to: Vec<String>,
}

async fn handle_session(
    stream: TcpStream,
    addr: SocketAddr,
    imposter: Arc<Imposter>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(b"220 imposterd smtp virtual server ready\r\n")
        .await?;

    let mut envelope = Envelope::default();

    loop {
        let mut line = String::new();
        let n = match tokio::time::timeout(READ_DEADLINE, reader.read_line(&mut line)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()), // idle past the read deadline
        };
        if n == 0 {
            return Ok(()); // client closed the connection
        }

        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }

        let (verb, rest) = split_command(trimmed);

        match verb.as_str() {
            "HELO" | "EHLO" => {
                write_half
                    .write_all(format!("250 Hello {rest}\r\n").as_bytes())
                    .await?;
            }
            "MAIL" => {
                envelope.from = extract_address(&rest);
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "RCPT" => {
                envelope.to.push(extract_address(&rest));
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "DATA" => {
                write_half
                    .write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
                    .await?;

                let mut body = String::new();
                loop {
                    let mut data_line = String::new();
                    let n = match tokio::time::timeout(
                        READ_DEADLINE,
                        reader.read_line(&mut data_line),
                    )
                    .await
                    {
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Ok(()),
                    };
                    if n == 0 {
                        return Ok(());
                    }
                    if data_line.trim_end() == "." {
                        break;
                    }
                    body.push_str(&data_line);
                }

                imposter.increment_request_count();

                let reply = process_message(&imposter, &envelope, &body, addr).await;
                write_half.write_all(reply.as_bytes()).await?;
            }
            "RSET" => {
                envelope = Envelope::default();
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "NOOP" => {
                write_half.write_all(b"250 OK\r\n").await?;
            }
            "QUIT" => {
                write_half.write_all(b"221 Bye\r\n").await?;
                return Ok(());
            }
            _ => {
                write_half
                    .write_all(b"500 Command not recognized\r\n")
                    .await?;
            }
        }
    }
}

fn split_command(line: &str) -> (String, String) {
    match line.split_once(' ') {
        Some((verb, rest)) => (verb.to_uppercase(), rest.trim().to_string()),
        None => (line.to_uppercase(), String::new()),
    }
}

fn extract_address(rest: &str) -> String {
    let rest = rest.trim();
    let rest = rest
        .strip_prefix("FROM:")
        .or_else(|| rest.strip_prefix("from:"))
        .unwrap_or(rest);
    let rest = rest
        .strip_prefix("TO:")
        .or_else(|| rest.strip_prefix("to:"))
        .unwrap_or(rest);
    rest.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

async fn process_message(
    imposter: &Imposter,
    envelope: &Envelope,
    body: &str,
    addr: SocketAddr,
) -> String {
    let to_joined = envelope.to.join(",");
    let mut headers = HashMap::new();
    headers.insert("From".to_string(), envelope.from.clone());
    headers.insert("To".to_string(), to_joined.clone());

    let mut headers_for_context = hyper::HeaderMap::new();
    for (k, v) in &headers {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::from_bytes(k.as_bytes()),
            hyper::header::HeaderValue::from_str(v),
        ) {
            headers_for_context.insert(name, value);
        }
    }

    let request_from = addr.to_string();
    let client_ip = addr.ip().to_string();

    let matched = imposter.find_matching_stub_with_client(
        "DATA",
        &to_joined,
        &headers_for_context,
        None,
        Some(body),
        Some(&request_from),
        Some(&client_ip),
    );

    let Some((stub, stub_index)) = matched else {
        return "250 OK\r\n".to_string();
    };

    let Some((status, mut resp_headers, mut resp_body, behaviors, _ext_ext, _response_mode, is_fault)) =
        imposter.execute_stub_with_ext(&stub, stub_index)
    else {
        return "250 OK\r\n".to_string();
    };

    if is_fault {
        return "451 Requested action aborted: local error\r\n".to_string();
    }

    if let Some(behaviors_json) = behaviors {
        if let Ok(parsed) = serde_json::from_value::<ResponseBehaviors>(behaviors_json) {
            if let Some(ref wait) = parsed.wait {
                match wait.resolve_ms() {
                    Ok(wait_ms) if wait_ms > 0 => {
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    }
                    Ok(_) => {}
                    Err(_err) => {
                        return "554 Transaction failed: invalid wait behavior\r\n".to_string();
                    }
                }
            }

            let request_context = RequestContext::plain(
                "DATA",
                &to_joined,
                HashMap::new(),
                headers.clone(),
                Some(body),
            );

            if !parsed.copy.is_empty() {
                resp_body = apply_copy_behaviors(
                    &resp_body,
                    &mut resp_headers,
                    &parsed.copy,
                    &request_context,
                );
            }

            if !parsed.lookup.is_empty() {
                resp_body = apply_lookup_behaviors(
                    &resp_body,
                    &mut resp_headers,
                    &parsed.lookup,
                    &request_context,
                    global_csv_cache(),
                );
            }

            if let Some(ref decorate_script) = parsed.decorate {
                match apply_js_or_rhai_decorate(
                    decorate_script,
                    &request_context,
                    &resp_body,
                    status,
                    &mut resp_headers,
                ) {
                    Ok((new_body, _new_status)) => resp_body = new_body,
                    Err(_err) => {
                        return "554 Transaction failed: decorate script error\r\n".to_string();
                    }
                }
            }
        }
    }

    smtp_reply_for_status(status, &resp_body)
}

/// Map an HTTP-shaped stub status code onto the nearest SMTP reply code.
/// Stubs authored with a literal 2xx/4xx/5xx pass straight through to the
/// matching SMTP family; anything else falls back to `250 OK`.
fn smtp_reply_for_status(status: u16, body: &str) -> String {
    let code = match status {
        200..=299 => 250,
        300..=399 => 251,
        400..=499 => 550,
        500..=599 => 451,
        _ => 250,
    };
    let text = if body.trim().is_empty() {
        "OK".to_string()
    } else {
        body.trim().replace('\n', " ")
    };
    format!("{code} {text}\r\n")
}
