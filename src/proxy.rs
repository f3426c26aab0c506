//! Node-local cache for static assets referenced by request bodies.
//!
//! Invocation bodies that point at the external origin are rewritten by the
//! engine to point here instead, so co-located invocations share one
//! download. Misses are fetched from the origin and stored whole; there is
//! no single-flight, so two concurrent misses on the same file may both
//! fetch and the last write wins.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::client::Forwarder;
use crate::error::ForwardError;
use crate::metrics::AgentMetrics;
use crate::store::BlobStore;

/// Route prefix assets are served under, mirroring the origin's layout.
pub const ASSET_PREFIX: &str = "/assets/images/";

/// HTTP cache in front of the static-asset origin.
pub struct AssetProxy {
  cache: Arc<BlobStore>,
  origin_host: String,
  forwarder: Arc<dyn Forwarder>,
  metrics: Arc<AgentMetrics>,
}

impl AssetProxy {
  pub fn new(
    cache: Arc<BlobStore>,
    origin_host: String,
    forwarder: Arc<dyn Forwarder>,
    metrics: Arc<AgentMetrics>,
  ) -> Self {
    Self {
      cache,
      origin_host,
      forwarder,
      metrics,
    }
  }

  /// Accepts connections and serves asset requests until the listener fails.
  pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "asset proxy listening");

    loop {
      let (stream, _) = listener.accept().await?;
      let io = TokioIo::new(stream);
      let proxy = self.clone();

      tokio::spawn(async move {
        let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
          let proxy = proxy.clone();
          async move { Ok::<_, Infallible>(proxy.handle(req).await) }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
          error!(error = %err, "error serving proxy connection");
        }
      });
    }
  }

  /// Serves `GET /assets/images/:fileName` from cache, fetching misses from
  /// the origin. Anything else is a 404.
  pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let Some(file_name) = path.strip_prefix(ASSET_PREFIX) else {
      return not_found();
    };
    if req.method() != Method::GET
      || file_name.is_empty()
      || file_name.contains('/')
      || !file_name.chars().all(|c| c.is_ascii_graphic())
    {
      return not_found();
    }

    if let Some(blob) = self.cache.get(file_name) {
      self.metrics.record_asset_hit();
      return attachment(file_name, blob);
    }

    match self.fetch_origin(file_name).await {
      Ok(blob) => {
        self.cache.put(file_name, blob.clone());
        attachment(file_name, blob)
      }
      Err(err) => {
        error!(file = %file_name, error = %err, "origin fetch failed");
        // Historical contract: a failed origin fetch answers 200 with an
        // empty body rather than an error status.
        Response::new(Full::new(Bytes::new()))
      }
    }
  }

  async fn fetch_origin(&self, file_name: &str) -> Result<Bytes, ForwardError> {
    let uri = format!("http://{}{}{}", self.origin_host, ASSET_PREFIX, file_name);
    let request = Request::builder()
      .method(Method::GET)
      .uri(uri)
      .body(Bytes::new())
      .map_err(|_| ForwardError::BadUri)?;
    let response = self.forwarder.send(request).await?;
    Ok(response.into_body())
  }
}

/// Builds the attachment-download response the dispatcher's clients expect.
fn attachment(file_name: &str, blob: Bytes) -> Response<Full<Bytes>> {
  let disposition = format!("attachment; filename={file_name}");
  let mut response = Response::new(Full::new(blob));
  let headers = response.headers_mut();
  headers.insert(
    "content-description",
    HeaderValue::from_static("File Transfer"),
  );
  headers.insert("content-transfer-encoding", HeaderValue::from_static("binary"));
  // The file name was validated to visible ASCII during routing.
  if let Ok(value) = HeaderValue::from_str(&disposition) {
    headers.insert(header::CONTENT_DISPOSITION, value);
  }
  headers.insert(
    header::CONTENT_TYPE,
    HeaderValue::from_static("application/octet-stream"),
  );
  response
}

fn not_found() -> Response<Full<Bytes>> {
  Response::builder()
    .status(StatusCode::NOT_FOUND)
    .body(Full::new(Bytes::new()))
    .unwrap()
}
