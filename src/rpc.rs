//! The dispatcher-facing RPC surface.
//!
//! One unary method, `TaskAssign`, carried as a `POST` of a prost-encoded
//! [`TaskRequest`] to [`TASK_ASSIGN_PATH`] over HTTP/1.1. The surface owns
//! envelope decoding and error mapping; everything else is the engine's.
//! Each connection is served on its own task, so invocations from different
//! dispatcher streams run concurrently with no cross-call ordering.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use prost::Message;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::engine::InvocationEngine;
use crate::error::{AgentError, ResolveError};

/// Request path of the unary method.
pub const TASK_ASSIGN_PATH: &str = "/agent.Tasks/TaskAssign";

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Invocation envelope. Field numbering is fixed by the dispatcher's schema,
/// including the historical spelling of `extera_path`.
#[derive(Clone, PartialEq, Message)]
pub struct TaskRequest {
  #[prost(string, tag = "1")]
  pub function_name: String,
  /// Path suffix appended to the resolved backend URL.
  #[prost(string, tag = "2")]
  pub extera_path: String,
  /// The invocation as HTTP/1.1 wire bytes.
  #[prost(bytes = "vec", tag = "3")]
  pub serialize_req: Vec<u8>,
  /// Dispatcher send time, nanoseconds since the Unix epoch.
  #[prost(int64, tag = "4")]
  pub time_nano_second: i64,
  /// Dispatcher's prediction that this invocation hits the response cache.
  #[prost(bool, tag = "5")]
  pub cache_hit: bool,
  /// Advisory fingerprints for the bulk-probe path; empty for invocations.
  #[prost(string, repeated, tag = "6")]
  pub request_hashes: Vec<String>,
}

/// Reply envelope: either one serialized response, or one blob per advisory
/// fingerprint on the bulk-probe path.
#[derive(Clone, PartialEq, Message)]
pub struct TaskResponse {
  #[prost(string, tag = "1")]
  pub message: String,
  #[prost(bytes = "vec", tag = "2")]
  pub response: Vec<u8>,
  #[prost(bytes = "vec", repeated, tag = "3")]
  pub responses: Vec<Vec<u8>>,
  /// Presence bitmap parallel to `responses`; distinguishes a cached empty
  /// blob from an absent entry. Absent entries still serialize as empty
  /// blobs for dispatchers that predate this field.
  #[prost(bool, repeated, tag = "4")]
  pub hit: Vec<bool>,
}

impl TaskResponse {
  /// Successful single-invocation reply.
  pub fn single(blob: Vec<u8>) -> Self {
    Self {
      message: "OK".to_string(),
      response: blob,
      responses: Vec::new(),
      hit: Vec::new(),
    }
  }

  /// Successful bulk-probe reply.
  pub fn bulk(responses: Vec<Vec<u8>>, hit: Vec<bool>) -> Self {
    Self {
      message: "OK".to_string(),
      response: Vec::new(),
      responses,
      hit,
    }
  }
}

/// Accepts dispatcher connections and serves the unary method until the
/// listener fails.
pub async fn serve(listener: TcpListener, engine: Arc<InvocationEngine>) -> std::io::Result<()> {
  let addr = listener.local_addr()?;
  info!(%addr, "agent RPC listening");

  loop {
    let (stream, _) = listener.accept().await?;
    let io = TokioIo::new(stream);
    let engine = engine.clone();

    tokio::spawn(async move {
      let svc = service_fn(move |req: Request<Incoming>| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(dispatch(req, engine).await) }
      });

      let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, svc);
      if let Err(err) = conn.await {
        error!(error = %err, "error serving RPC connection");
      }
    });
  }
}

/// Decodes the envelope, runs the engine, and maps errors onto the wire.
pub async fn dispatch<B>(req: Request<B>, engine: Arc<InvocationEngine>) -> Response<Full<Bytes>>
where
  B: hyper::body::Body,
  B::Error: std::fmt::Display,
{
  if req.method() != Method::POST || req.uri().path() != TASK_ASSIGN_PATH {
    return plain(StatusCode::NOT_FOUND, "unknown method");
  }
  if !is_protobuf(req.headers()) {
    return plain(
      StatusCode::UNSUPPORTED_MEDIA_TYPE,
      "expected application/x-protobuf",
    );
  }

  let body = match req.into_body().collect().await {
    Ok(collected) => collected.to_bytes(),
    Err(err) => {
      return plain(
        StatusCode::BAD_REQUEST,
        &format!("failed to read request body: {err}"),
      );
    }
  };
  let task = match TaskRequest::decode(body.as_ref()) {
    Ok(task) => task,
    Err(err) => {
      return plain(
        StatusCode::BAD_REQUEST,
        &format!("failed to decode task request: {err}"),
      );
    }
  };

  match engine.handle(task).await {
    Ok(reply) => {
      let mut response = Response::new(Full::new(Bytes::from(reply.encode_to_vec())));
      response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
      response
    }
    Err(err) => {
      error!(error = %err, "task failed");
      plain(status_for(&err), &err.to_string())
    }
  }
}

fn status_for(err: &AgentError) -> StatusCode {
  match err {
    AgentError::Codec { .. } => StatusCode::BAD_REQUEST,
    AgentError::Resolve(ResolveError::NotFound(_)) => StatusCode::NOT_FOUND,
    AgentError::Resolve(_) => StatusCode::INTERNAL_SERVER_ERROR,
    AgentError::Upstream { .. } | AgentError::Forward(_) => StatusCode::BAD_GATEWAY,
  }
}

fn is_protobuf(headers: &http::HeaderMap) -> bool {
  headers
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .map(|ct| ct == PROTOBUF_CONTENT_TYPE || ct.starts_with("application/x-protobuf;"))
    .unwrap_or(false)
}

fn plain(status: StatusCode, text: &str) -> Response<Full<Bytes>> {
  Response::builder()
    .status(status)
    .body(Full::new(Bytes::from(text.to_string())))
    .unwrap()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::HyperForwarder;
  use crate::config::AgentConfig;
  use crate::metrics::AgentMetrics;
  use crate::resolver::{InvokeResolver, StaticLookup};
  use crate::store::BlobStore;

  fn engine() -> (Arc<InvocationEngine>, Arc<BlobStore>) {
    let config = AgentConfig::default();
    let response_cache = Arc::new(BlobStore::new(config.response_cache_capacity));
    let asset_cache = Arc::new(BlobStore::new(config.asset_cache_capacity));
    let engine = InvocationEngine::new(
      config.clone(),
      response_cache.clone(),
      asset_cache,
      InvokeResolver::new(Arc::new(StaticLookup::default())),
      Arc::new(HyperForwarder::new(&config.upstream)),
      Arc::new(AgentMetrics::default()),
      None,
    );
    (Arc::new(engine), response_cache)
  }

  fn envelope(task: &TaskRequest) -> Request<Full<Bytes>> {
    Request::builder()
      .method(Method::POST)
      .uri(TASK_ASSIGN_PATH)
      .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
      .body(Full::new(Bytes::from(task.encode_to_vec())))
      .unwrap()
  }

  async fn decode_reply(response: Response<Full<Bytes>>) -> TaskResponse {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TaskResponse::decode(body.as_ref()).unwrap()
  }

  #[tokio::test]
  async fn unknown_path_is_not_found() {
    let (engine, _) = engine();
    let req = Request::builder()
      .method(Method::POST)
      .uri("/somewhere/else")
      .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
      .body(Full::new(Bytes::new()))
      .unwrap();
    let response = dispatch(req, engine).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn non_protobuf_payloads_are_rejected() {
    let (engine, _) = engine();
    let req = Request::builder()
      .method(Method::POST)
      .uri(TASK_ASSIGN_PATH)
      .header(CONTENT_TYPE, "application/json")
      .body(Full::new(Bytes::from_static(b"{}")))
      .unwrap();
    let response = dispatch(req, engine).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
  }

  #[tokio::test]
  async fn undecodable_envelope_is_bad_request() {
    let (engine, _) = engine();
    let req = Request::builder()
      .method(Method::POST)
      .uri(TASK_ASSIGN_PATH)
      .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
      .body(Full::new(Bytes::from_static(&[0xff, 0xff, 0xff])))
      .unwrap();
    let response = dispatch(req, engine).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn unknown_function_maps_to_not_found() {
    let (engine, _) = engine();
    let task = TaskRequest {
      function_name: "missing".to_string(),
      serialize_req: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
      ..Default::default()
    };
    let response = dispatch(envelope(&task), engine).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn bulk_probe_round_trips_over_the_wire() {
    let (engine, response_cache) = engine();
    response_cache.put("f1", Bytes::from_static(b"cached"));

    let task = TaskRequest {
      function_name: "echo".to_string(),
      request_hashes: vec!["f1".to_string(), "f2".to_string()],
      ..Default::default()
    };
    let response = dispatch(envelope(&task), engine).await;
    assert_eq!(response.status(), StatusCode::OK);

    let reply = decode_reply(response).await;
    assert_eq!(reply.message, "OK");
    assert_eq!(reply.responses, vec![b"cached".to_vec(), Vec::new()]);
    assert_eq!(reply.hit, vec![true, false]);
  }
}
