//! Outbound HTTP plumbing shared by the invocation forward and the asset
//! proxy's origin fetch.
//!
//! Requests and responses are fully materialized: the caller hands over the
//! complete body bytes and gets the complete response body back. Streaming
//! is deliberately not supported anywhere in the agent.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::config::UpstreamOptions;
use crate::error::ForwardError;

/// Sends one materialized request to an absolute `http://` URI and returns
/// the materialized response.
///
/// An HTTP-level response of any status is `Ok`; only transport failures
/// (connect, reset, deadline) are errors, and those are the retryable class.
#[async_trait]
pub trait Forwarder: Send + Sync {
  async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, ForwardError>;
}

/// [`Forwarder`] backed by a pooled hyper client.
///
/// One instance is shared by every invocation and by the asset proxy; the
/// pool keeps up to `max_idle_conns` warm connections per backend around
/// for `idle_timeout`.
pub struct HyperForwarder {
  client: Client<HttpConnector, Full<Bytes>>,
  read_timeout: Option<Duration>,
}

impl HyperForwarder {
  pub fn new(options: &UpstreamOptions) -> Self {
    let client = Client::builder(TokioExecutor::new())
      .pool_idle_timeout(options.idle_timeout)
      .pool_max_idle_per_host(options.max_idle_conns)
      .build_http();
    Self {
      client,
      read_timeout: options.read_timeout,
    }
  }

  async fn roundtrip(&self, req: Request<Full<Bytes>>) -> Result<Response<Bytes>, ForwardError> {
    let response = self
      .client
      .request(req)
      .await
      .map_err(|err| ForwardError::Transport(Box::new(err)))?;

    let (parts, body) = response.into_parts();
    let collected = body
      .collect()
      .await
      .map_err(|err| ForwardError::Transport(Box::new(err)))?;

    Ok(Response::from_parts(parts, collected.to_bytes()))
  }
}

#[async_trait]
impl Forwarder for HyperForwarder {
  async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, ForwardError> {
    if req.uri().scheme().is_none() || req.uri().authority().is_none() {
      return Err(ForwardError::BadUri);
    }
    let req = req.map(Full::new);

    match self.read_timeout {
      Some(deadline) => timeout(deadline, self.roundtrip(req))
        .await
        .unwrap_or(Err(ForwardError::Timeout(deadline))),
      None => self.roundtrip(req).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn relative_target_is_rejected_before_connecting() {
    let forwarder = HyperForwarder::new(&UpstreamOptions::default());
    let req = Request::builder()
      .uri("/no-authority")
      .body(Bytes::new())
      .unwrap();
    match forwarder.send(req).await {
      Err(ForwardError::BadUri) => {}
      other => panic!("expected BadUri, got {other:?}"),
    }
  }

  #[test]
  fn transport_failures_are_retryable_and_bad_uris_are_not() {
    assert!(!ForwardError::BadUri.is_retryable());
    assert!(ForwardError::Timeout(Duration::from_secs(1)).is_retryable());
    assert!(ForwardError::Transport("connection refused".into()).is_retryable());
  }
}
