use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use agent::client::HyperForwarder;
use agent::config::AgentConfig;
use agent::engine::InvocationEngine;
use agent::metrics::AgentMetrics;
use agent::proxy::AssetProxy;
use agent::resolver::{InvokeResolver, StaticLookup};
use agent::sink::CsvSink;
use agent::store::BlobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  agent::tracing::init_tracing();

  let mut args = std::env::args().skip(1);
  let rpc_port: u16 = args
    .next()
    .context("usage: faasd-agent <rpc-port> [proxy-port]")?
    .parse()
    .context("rpc port must be a number")?;

  let mut config = AgentConfig::from_env()?;

  let proxy_port = if config.asset_cache_enabled {
    let port: u16 = args
      .next()
      .context("proxy port is required when file caching is enabled")?
      .parse()
      .context("proxy port must be a number")?;
    config.self_endpoint = format!("{}:{}", config.self_ip, port);
    Some(port)
  } else {
    None
  };

  let metrics = Arc::new(AgentMetrics::default());
  let response_cache = Arc::new(BlobStore::new(config.response_cache_capacity));
  let asset_cache = Arc::new(BlobStore::new(config.asset_cache_capacity));
  let forwarder = Arc::new(HyperForwarder::new(&config.upstream));
  let resolver = InvokeResolver::new(Arc::new(StaticLookup::new(config.functions.clone())));
  let sink = match config.csv_sink_enabled {
    true => Some(Arc::new(CsvSink::open(&config.csv_path).with_context(
      || format!("failed to open csv sink at {}", config.csv_path),
    )?)),
    false => None,
  };

  if let Some(port) = proxy_port {
    let listener = TcpListener::bind(("0.0.0.0", port))
      .await
      .context("failed to bind asset proxy port")?;
    let proxy = Arc::new(AssetProxy::new(
      asset_cache.clone(),
      config.origin_host.clone(),
      forwarder.clone(),
      metrics.clone(),
    ));
    tokio::spawn(async move {
      if let Err(err) = proxy.serve(listener).await {
        tracing::error!(error = %err, "asset proxy terminated");
      }
    });
  }

  let engine = Arc::new(InvocationEngine::new(
    config,
    response_cache,
    asset_cache,
    resolver,
    forwarder,
    metrics,
    sink,
  ));

  let listener = TcpListener::bind(("0.0.0.0", rpc_port))
    .await
    .context("failed to bind RPC port")?;
  agent::rpc::serve(listener, engine)
    .await
    .context("RPC server terminated")?;
  Ok(())
}
