//! gRPC protocol adapter.
//!
//! Serves unary gRPC calls over HTTP/2 without a compiled `.proto`: the
//! wire bytes of the request message are decoded opportunistically as JSON
//! (common for JSON-transcoded or protojson-based test doubles) and
//! otherwise surfaced as a base64 `message` field, alongside `{service,
//! method, metadata}`. The matched stub's body is written back as the raw
//! gRPC payload; status comes back as a `grpc-status` trailer using
//! `tonic`'s status codes rather than a hand-rolled enum.

use crate::behaviors::{
    apply_copy_behaviors, apply_lookup_behaviors, global_csv_cache, RequestContext,
    ResponseBehaviors,
};
use crate::imposter::{apply_js_or_rhai_decorate, Imposter, ResponseMode};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tonic::Code;
use tracing::{debug, error};

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
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let imposter = Arc::clone(&imposter);
                                async move { handle_grpc_request(req, imposter, addr).await }
                            });
                            if let Err(e) = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                                .serve_connection(io, service)
                                .await
                            {
                                debug!("grpc connection error on {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("grpc accept error: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// Single-shot response body: one data frame, then gRPC trailers.
struct GrpcBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl GrpcBody {
    fn new(data: Bytes, trailers: HeaderMap) -> Self {
        Self {
            data: Some(data),
            trailers: Some(trailers),
        }
    }
}

impl Body for GrpcBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(trailers) = self.trailers.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }
}

async fn handle_grpc_request(
    req: Request<Incoming>,
    imposter: Arc<Imposter>,
    client_addr: SocketAddr,
) -> Result<Response<GrpcBody>, std::convert::Infallible> {
    imposter.increment_request_count();

    // path is "/package.Service/Method"
    let path = req.uri().path().to_string();
    let (service, method) = split_service_method(&path);

    let metadata: HashMap<String, String> = req
        .headers()
        .iter()
        .filter(|(k, _)| {
            let name = k.as_str();
            name != "content-type" && name != "te" && !name.starts_with("grpc-")
        })
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let frame_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let message_payload = unwrap_grpc_frame(&frame_bytes);

    // Decode opportunistically as JSON; fall back to base64.
    let (body_for_matching, message_value) =
        match serde_json::from_slice::<serde_json::Value>(&message_payload) {
            Ok(value) => (serde_json::to_string(&value).unwrap_or_default(), value),
            Err(_) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&message_payload);
                (b64.clone(), serde_json::Value::String(b64))
            }
        };

    // Flatten top-level message fields into the query map so a plain
    // `equals` predicate against `query` can address message fields
    // directly, without a dedicated gRPC predicate dialect.
    let mut query: HashMap<String, String> = HashMap::new();
    if let serde_json::Value::Object(ref map) = message_value {
        for (k, v) in map {
            let value = v
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| v.to_string());
            query.insert(k.clone(), value);
        }
    }
    query.insert("service".to_string(), service.clone());
    query.insert("method".to_string(), method.clone());

    let mut headers_for_context = HeaderMap::new();
    for (k, v) in &metadata {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::from_bytes(k.as_bytes()),
            hyper::header::HeaderValue::from_str(v),
        ) {
            headers_for_context.insert(name, value);
        }
    }

    let request_from = client_addr.to_string();
    let client_ip = client_addr.ip().to_string();

    let matched = imposter.find_matching_stub_with_client(
        &method,
        &path,
        &headers_for_context,
        None,
        Some(&body_for_matching),
        Some(&request_from),
        Some(&client_ip),
    );

    let Some((stub, stub_index)) = matched else {
        return Ok(status_only_response(Code::NotFound, "no matching stub"));
    };

    let Some((status, mut headers, mut body, behaviors, _ext_ext, response_mode, is_fault)) =
        imposter.execute_stub_with_ext(&stub, stub_index)
    else {
        return Ok(status_only_response(Code::Unknown, "stub has no responses"));
    };

    if is_fault {
        return Ok(status_only_response(Code::Unavailable, &body));
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
                        return Ok(status_only_response(Code::InvalidArgument, &err));
                    }
                }
            }

            let request_context = RequestContext::plain(
                &method,
                &path,
                query,
                metadata,
                Some(&body_for_matching),
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
                        return Ok(status_only_response(Code::Internal, &err));
                    }
                }
            }
        }
    }

    let payload = match response_mode {
        ResponseMode::Binary => base64::engine::general_purpose::STANDARD
            .decode(&body)
            .unwrap_or_else(|_| body.clone().into_bytes()),
        ResponseMode::Text => body.into_bytes(),
    };

    let grpc_code = if (200..300).contains(&status) {
        Code::Ok
    } else {
        Code::Unknown
    };

    Ok(build_grpc_response(
        grpc_code,
        "",
        frame_grpc_payload(&payload),
        &headers,
    ))
}

fn split_service_method(path: &str) -> (String, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) => (service.to_string(), method.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Strip the 5-byte gRPC frame header (1-byte compression flag + 4-byte
/// big-endian length) from a unary request payload.
fn unwrap_grpc_frame(bytes: &Bytes) -> Bytes {
    if bytes.len() < 5 {
        return Bytes::new();
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let end = (5 + len).min(bytes.len());
    bytes.slice(5..end)
}

/// Prefix a message payload with the 5-byte gRPC frame header.
fn frame_grpc_payload(payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(5 + payload.len());
    framed.extend_from_slice(&[0u8]); // uncompressed
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed.freeze()
}

fn status_only_response(code: Code, message: &str) -> Response<GrpcBody> {
    build_grpc_response(code, message, Bytes::new(), &HashMap::new())
}

fn build_grpc_response(
    code: Code,
    message: &str,
    payload: Bytes,
    extra_headers: &HashMap<String, String>,
) -> Response<GrpcBody> {
    let mut trailers = HeaderMap::new();
    let status_value = (code as i32)
        .to_string()
        .parse()
        .unwrap_or_else(|_| hyper::header::HeaderValue::from_static("2"));
    trailers.insert("grpc-status", status_value);
    if !message.is_empty() {
        if let Ok(v) = hyper::header::HeaderValue::from_str(message) {
            trailers.insert("grpc-message", v);
        }
    }

    let mut response = Response::builder()
        .status(200)
        .header("content-type", "application/grpc+proto");
    for (k, v) in extra_headers {
        response = response.header(k, v);
    }

    response
        .body(GrpcBody::new(payload, trailers))
        .unwrap_or_else(|_| Response::new(GrpcBody::new(Bytes::new(), HeaderMap::new())))
}
