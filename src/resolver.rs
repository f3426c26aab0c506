//! Resolves dispatched function names to watchdog endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::ResolveError;

/// Port the in-container watchdog listens on.
pub const WATCHDOG_PORT: u16 = 8080;

/// A function known to the local runtime, reduced to what forwarding needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
  pub name: String,
  pub ip: String,
}

/// Lookup backend mapping a function name to its record.
///
/// The production backend queries the container runtime over its socket;
/// [`StaticLookup`] serves fixed single-node setups and tests.
#[async_trait]
pub trait FunctionLookup: Send + Sync {
  async fn lookup(&self, function_name: &str) -> Option<FunctionRecord>;
}

/// Static `name -> ip` table.
#[derive(Debug, Default)]
pub struct StaticLookup {
  table: HashMap<String, String>,
}

impl StaticLookup {
  pub fn new(table: HashMap<String, String>) -> Self {
    Self { table }
  }
}

#[async_trait]
impl FunctionLookup for StaticLookup {
  async fn lookup(&self, function_name: &str) -> Option<FunctionRecord> {
    self.table.get(function_name).map(|ip| FunctionRecord {
      name: function_name.to_string(),
      ip: ip.clone(),
    })
  }
}

/// Maps function names to reachable backend URLs.
pub struct InvokeResolver {
  lookup: Arc<dyn FunctionLookup>,
}

impl InvokeResolver {
  pub fn new(lookup: Arc<dyn FunctionLookup>) -> Self {
    Self { lookup }
  }

  /// Returns `http://<ip>:8080` for the named function.
  pub async fn resolve(
    &self,
    function_name: &str,
  ) -> Result<(Url, FunctionRecord), ResolveError> {
    let record = self
      .lookup
      .lookup(function_name)
      .await
      .ok_or_else(|| ResolveError::NotFound(function_name.to_string()))?;

    let url = Url::parse(&format!("http://{}:{}", record.ip, WATCHDOG_PORT))
      .map_err(|err| ResolveError::InvalidUrl(err.to_string()))?;

    Ok((url, record))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resolver() -> InvokeResolver {
    let table = HashMap::from([("echo".to_string(), "10.0.0.5".to_string())]);
    InvokeResolver::new(Arc::new(StaticLookup::new(table)))
  }

  #[tokio::test]
  async fn resolves_to_watchdog_url() {
    let (url, record) = resolver().resolve("echo").await.unwrap();
    assert_eq!(url.as_str(), "http://10.0.0.5:8080/");
    assert_eq!(record.name, "echo");
    assert_eq!(record.ip, "10.0.0.5");
  }

  #[tokio::test]
  async fn unknown_function_is_not_found() {
    match resolver().resolve("missing").await {
      Err(ResolveError::NotFound(name)) => assert_eq!(name, "missing"),
      other => panic!("expected not found, got {other:?}"),
    }
  }
}
