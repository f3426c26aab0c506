//! Per-node execution agent for a function-as-a-service platform.
//!
//! A central dispatcher forwards serialized HTTP invocations to this agent
//! over a unary RPC. The agent resolves the named function to its locally
//! running container, forwards the request to the in-container watchdog,
//! and returns the serialized response. Two caches short-circuit repeated
//! work:
//!
//! - a response cache keyed by a fingerprint of `(function name, body)`,
//!   with a bulk-probe path letting the dispatcher ask which fingerprints
//!   this node already holds;
//! - an optional asset proxy that caches static files referenced by request
//!   bodies, with origin references rewritten so sibling invocations on the
//!   same node share downloads.
//!
//! # Key concepts
//! - [`engine::InvocationEngine`] orchestrates one invocation end to end.
//! - [`rpc`] carries the dispatcher wire contract and the serve loop.
//! - [`store::BlobStore`] is the bounded LRU both cache tiers use.
//! - [`proxy::AssetProxy`] serves `GET /assets/images/:fileName`.
//!
//! # Runtime
//! - `tokio` throughout; every connection is served on its own task.
//! - HTTP via `hyper` 1.x; bodies are always fully materialized.

/// Outbound HTTP client shared by forwards and origin fetches.
pub mod client;

/// HTTP/1.1 wire codec for serialized requests and responses.
pub mod codec;

/// Startup configuration read from the environment.
pub mod config;

/// The invocation pipeline.
pub mod engine;

/// Error taxonomy.
pub mod error;

/// Cache-key fingerprints.
pub mod fingerprint;

/// Process-wide counters.
pub mod metrics;

/// Asset proxy server.
pub mod proxy;

/// Function name resolution.
pub mod resolver;

/// Dispatcher-facing RPC surface.
pub mod rpc;

/// CSV benchmark sink.
pub mod sink;

/// Bounded LRU blob store.
pub mod store;

/// Tracing subscriber setup.
pub mod tracing;

pub use config::AgentConfig;
pub use engine::InvocationEngine;
pub use error::AgentError;
