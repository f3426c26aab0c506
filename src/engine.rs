//! The invocation pipeline: probe, resolve, forward, populate.
//!
//! One engine instance serves every dispatcher call. It holds no per-call
//! state outside the call frame, so calls run concurrently without
//! coordination; the caches serialize internally. There is deliberately no
//! per-key single-flight around the miss path: two concurrent misses on the
//! same fingerprint both forward upstream and the second insert wins.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{Request, Uri, Version, header};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::Forwarder;
use crate::codec;
use crate::config::AgentConfig;
use crate::error::{AgentError, ResolveError};
use crate::fingerprint::fingerprint;
use crate::metrics::AgentMetrics;
use crate::resolver::InvokeResolver;
use crate::rpc::{TaskRequest, TaskResponse};
use crate::sink::CsvSink;
use crate::store::BlobStore;

/// Orchestrates one dispatcher invocation end to end.
pub struct InvocationEngine {
  config: AgentConfig,
  response_cache: Arc<BlobStore>,
  asset_cache: Arc<BlobStore>,
  resolver: InvokeResolver,
  forwarder: Arc<dyn Forwarder>,
  metrics: Arc<AgentMetrics>,
  sink: Option<Arc<CsvSink>>,
}

impl InvocationEngine {
  pub fn new(
    config: AgentConfig,
    response_cache: Arc<BlobStore>,
    asset_cache: Arc<BlobStore>,
    resolver: InvokeResolver,
    forwarder: Arc<dyn Forwarder>,
    metrics: Arc<AgentMetrics>,
    sink: Option<Arc<CsvSink>>,
  ) -> Self {
    Self {
      config,
      response_cache,
      asset_cache,
      resolver,
      forwarder,
      metrics,
      sink,
    }
  }

  /// Handles one dispatcher call.
  ///
  /// A request carrying advisory fingerprints is answered from cache state
  /// alone (see [`Self::bulk_probe`]); everything else runs the full
  /// pipeline: decode, fingerprint, cache probe, origin rewrite, resolve,
  /// forward with retries, serialize, populate.
  pub async fn handle(&self, task: TaskRequest) -> Result<TaskResponse, AgentError> {
    debug!(function = %task.function_name, "task received");

    if self.config.bulk_probe_enabled && !task.request_hashes.is_empty() {
      return Ok(self.bulk_probe(&task.request_hashes));
    }

    self.metrics.record_task(&task.function_name);
    self
      .metrics
      .add_ingress_latency_ns(ingress_nanos(task.time_nano_second));

    let request = codec::decode_request(&task.serialize_req).map_err(|source| {
      AgentError::Codec {
        stage: "request",
        source,
      }
    })?;
    let (parts, body) = request.into_parts();
    let key = fingerprint(&task.function_name, &body);

    // Asset-caching mode trades the response cache for the asset cache.
    let response_caching = self.config.response_cache_enabled && !self.config.asset_cache_enabled;
    if response_caching {
      if let Some(blob) = self.response_cache.get(&key) {
        self.metrics.record_hit(task.cache_hit);
        debug!(function = %task.function_name, "served from response cache");
        return Ok(TaskResponse::single(blob.to_vec()));
      }
      self.metrics.record_miss(task.cache_hit);
    }

    let body = if self.config.asset_cache_enabled {
      rewrite_origin(&body, &self.config.origin_host, &self.config.self_endpoint)
    } else {
      body
    };

    let (base, _record) = self.resolver.resolve(&task.function_name).await?;

    let started = Instant::now();
    let response = self
      .forward_with_retry(&parts, &base, &task.extera_path, &body)
      .await?;
    let seconds = started.elapsed().as_secs_f64();
    self
      .metrics
      .add_upstream_latency_ms(started.elapsed().as_millis() as u64);

    let blob = codec::encode_response(&response);
    if response_caching {
      self.response_cache.put(key, Bytes::from(blob.clone()));
    }

    if let Some(sink) = &self.sink {
      let input = extract_asset_name(&body);
      sink.record(
        &task.function_name,
        input.as_deref().unwrap_or("-"),
        body.len(),
        seconds,
      );
    }

    info!(function = %task.function_name, seconds, "invocation complete");
    Ok(TaskResponse::single(blob))
  }

  /// Reports which advisory fingerprints are held locally, without any
  /// upstream work or cache population. Absent entries are empty blobs;
  /// the `hit` bitmap makes presence explicit.
  fn bulk_probe(&self, hashes: &[String]) -> TaskResponse {
    let mut responses = Vec::with_capacity(hashes.len());
    let mut hit = Vec::with_capacity(hashes.len());

    for hash in hashes {
      let blob = if self.config.asset_cache_enabled {
        self
          .asset_cache
          .get(asset_probe_key(hash, &self.config.origin_host))
      } else {
        self.response_cache.get(hash)
      };
      match blob {
        Some(blob) => {
          responses.push(blob.to_vec());
          hit.push(true);
        }
        None => {
          responses.push(Vec::new());
          hit.push(false);
        }
      }
    }

    debug!(
      probed = hashes.len(),
      held = hit.iter().filter(|h| **h).count(),
      "bulk probe answered"
    );
    TaskResponse::bulk(responses, hit)
  }

  /// Runs the forward with a bounded retry loop. Only transport-level
  /// failures consume the budget; an HTTP-level response of any status
  /// returns immediately.
  async fn forward_with_retry(
    &self,
    parts: &http::request::Parts,
    base: &Url,
    extera_path: &str,
    body: &Bytes,
  ) -> Result<http::Response<Bytes>, AgentError> {
    let budget = self.config.retry_budget.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      let request = build_forward_request(parts, base, extera_path, body.clone())?;
      match self.forwarder.send(request).await {
        Ok(response) => return Ok(response),
        Err(err) if err.is_retryable() && attempt < budget => {
          warn!(
            target_url = %base,
            attempt,
            error = %err,
            "upstream transport failure, retrying"
          );
        }
        Err(err) if err.is_retryable() => {
          return Err(AgentError::Upstream {
            attempts: budget,
            source: err,
          });
        }
        Err(err) => return Err(err.into()),
      }
    }
  }
}

/// Clones the decoded request onto the resolved backend, appending the extra
/// path and propagating headers. `Host` and framing headers are dropped: the
/// client derives them from the target authority and the materialized body,
/// which may have changed length during origin rewriting.
fn build_forward_request(
  parts: &http::request::Parts,
  base: &Url,
  extera_path: &str,
  body: Bytes,
) -> Result<Request<Bytes>, AgentError> {
  let target = if extera_path.is_empty() {
    base.clone()
  } else {
    base
      .join(extera_path)
      .map_err(|err| AgentError::Resolve(ResolveError::InvalidUrl(err.to_string())))?
  };
  let uri: Uri = target
    .as_str()
    .parse()
    .map_err(|_| AgentError::Resolve(ResolveError::InvalidUrl(target.to_string())))?;

  let mut builder = Request::builder()
    .method(parts.method.clone())
    .uri(uri)
    .version(Version::HTTP_11);
  for (name, value) in &parts.headers {
    if name == header::HOST
      || name == header::CONTENT_LENGTH
      || name == header::TRANSFER_ENCODING
    {
      continue;
    }
    builder = builder.header(name, value);
  }

  builder.body(body).map_err(|source| AgentError::Codec {
    stage: "request",
    source: source.into(),
  })
}

/// Rewrites every origin-host reference in `body` to point at the local
/// asset proxy, so sibling invocations on this node share downloads.
fn rewrite_origin(body: &Bytes, origin_host: &str, self_endpoint: &str) -> Bytes {
  let needle = origin_host.as_bytes();
  if needle.is_empty() {
    return body.clone();
  }

  let mut out = Vec::with_capacity(body.len());
  let mut i = 0;
  while i < body.len() {
    if body[i..].starts_with(needle) {
      out.extend_from_slice(self_endpoint.as_bytes());
      i += needle.len();
    } else {
      out.push(body[i]);
      i += 1;
    }
  }
  Bytes::from(out)
}

/// Advisory fingerprints in asset-caching mode arrive as full origin URLs;
/// the asset cache is keyed by file name, so reduce the URL to its path
/// tail. Fingerprints without the origin prefix are probed verbatim.
fn asset_probe_key<'a>(hash: &'a str, origin_host: &str) -> &'a str {
  if origin_host.is_empty() {
    return hash;
  }
  match hash
    .strip_prefix("http://")
    .and_then(|rest| rest.strip_prefix(origin_host))
  {
    Some(path) => path.rsplit('/').next().unwrap_or(path),
    None => hash,
  }
}

/// First asset file name referenced by the body, for benchmark rows.
fn extract_asset_name(body: &[u8]) -> Option<String> {
  const MARKER: &[u8] = b"/assets/images/";
  let start = body.windows(MARKER.len()).position(|w| w == MARKER)? + MARKER.len();
  let tail = &body[start..];
  let end = tail
    .iter()
    .position(|b| !(b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_')))
    .unwrap_or(tail.len());
  if end == 0 {
    return None;
  }
  Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn ingress_nanos(dispatched_at: i64) -> u64 {
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as i64)
    .unwrap_or(0);
  now.saturating_sub(dispatched_at).max(0) as u64
}
