//! Cache-key fingerprints over function identity and request bodies.

use sha1::{Digest, Sha1};

/// Hex SHA-1 digest of `function_name || body`.
///
/// The function name acts as a namespace: two functions invoked with an
/// identical body produce distinct keys. The digest is deterministic across
/// processes, so dispatcher-side advisory fingerprints line up with the keys
/// computed here.
pub fn fingerprint(function_name: &str, body: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(function_name.as_bytes());
  hasher.update(body);
  format!("{:x}", hasher.finalize())
}
