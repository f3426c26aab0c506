//! HTTP/1.1 wire codec for dispatcher-serialized requests and responses.
//!
//! The dispatcher ships each invocation as raw HTTP/1.1 bytes and expects
//! the response in the same format; these bytes are also what the response
//! cache stores. [`decode_request`] materializes the body up front so later
//! stages (fingerprinting, rewriting, forwarding) can read it repeatedly
//! without re-wrapping a stream.

use bytes::Bytes;
use http::{Request, Response, Version, header};

use crate::error::CodecError;

const MAX_HEADERS: usize = 64;

/// Parses wire bytes into a request with a materialized body.
///
/// The body length is taken from `Content-Length` when present; without it,
/// everything after the header block is the body. Headers and body bytes are
/// preserved exactly.
pub fn decode_request(raw: &[u8]) -> Result<Request<Bytes>, CodecError> {
  let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
  let mut parsed = httparse::Request::new(&mut headers);
  let header_len = match parsed.parse(raw)? {
    httparse::Status::Complete(n) => n,
    httparse::Status::Partial => return Err(CodecError::Incomplete),
  };

  let method = parsed.method.ok_or(CodecError::Incomplete)?;
  let path = parsed.path.ok_or(CodecError::Incomplete)?;
  let version = match parsed.version {
    Some(0) => Version::HTTP_10,
    _ => Version::HTTP_11,
  };

  let mut builder = Request::builder().method(method).uri(path).version(version);
  let mut content_length = None;
  for header in parsed.headers.iter() {
    if header.name.eq_ignore_ascii_case("content-length") {
      let text =
        std::str::from_utf8(header.value).map_err(|_| CodecError::InvalidContentLength)?;
      content_length = Some(
        text
          .trim()
          .parse::<usize>()
          .map_err(|_| CodecError::InvalidContentLength)?,
      );
    }
    builder = builder.header(header.name, header.value);
  }

  let rest = &raw[header_len..];
  let body = match content_length {
    Some(expected) if rest.len() < expected => {
      return Err(CodecError::TruncatedBody {
        expected,
        found: rest.len(),
      });
    }
    Some(expected) => Bytes::copy_from_slice(&rest[..expected]),
    None => Bytes::copy_from_slice(rest),
  };

  Ok(builder.body(body)?)
}

/// Serializes a materialized response to wire bytes.
///
/// Since the body is fully materialized, `Transfer-Encoding` is dropped and
/// an accurate `Content-Length` is always emitted; all other headers are
/// preserved as stored.
pub fn encode_response(response: &Response<Bytes>) -> Vec<u8> {
  let status = response.status();
  let mut out = Vec::with_capacity(response.body().len() + 256);
  out.extend_from_slice(version_str(response.version()).as_bytes());
  out.extend_from_slice(
    format!(
      " {} {}\r\n",
      status.as_u16(),
      status.canonical_reason().unwrap_or("")
    )
    .as_bytes(),
  );
  write_headers_and_body(&mut out, response.headers(), response.body());
  out
}

/// Serializes a materialized request to wire bytes. The inverse of
/// [`decode_request`], used to hand requests back to HTTP/1.1 peers.
pub fn encode_request(request: &Request<Bytes>) -> Vec<u8> {
  let mut out = Vec::with_capacity(request.body().len() + 256);
  let path = request
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");
  out.extend_from_slice(
    format!(
      "{} {} {}\r\n",
      request.method(),
      path,
      version_str(request.version())
    )
    .as_bytes(),
  );
  write_headers_and_body(&mut out, request.headers(), request.body());
  out
}

fn write_headers_and_body(out: &mut Vec<u8>, headers: &http::HeaderMap, body: &Bytes) {
  for (name, value) in headers {
    if name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
      continue;
    }
    out.extend_from_slice(name.as_str().as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
  }
  out.extend_from_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
  out.extend_from_slice(body);
}

fn version_str(version: Version) -> &'static str {
  match version {
    Version::HTTP_10 => "HTTP/1.0",
    _ => "HTTP/1.1",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use http::Method;

  #[test]
  fn decodes_request_with_body() {
    let raw = b"POST /function/echo HTTP/1.1\r\nhost: gateway\r\ncontent-length: 2\r\n\r\nhi";
    let request = decode_request(raw).unwrap();
    assert_eq!(request.method(), Method::POST);
    assert_eq!(request.uri().path(), "/function/echo");
    assert_eq!(request.headers()["host"], "gateway");
    assert_eq!(request.body().as_ref(), b"hi");
  }

  #[test]
  fn decodes_request_without_content_length() {
    let raw = b"POST /run HTTP/1.1\r\nhost: gateway\r\n\r\npayload";
    let request = decode_request(raw).unwrap();
    assert_eq!(request.body().as_ref(), b"payload");
  }

  #[test]
  fn body_is_re_readable() {
    let raw = b"POST /run HTTP/1.1\r\ncontent-length: 2\r\n\r\nhi";
    let request = decode_request(raw).unwrap();
    let first = request.body().clone();
    let second = request.body().clone();
    assert_eq!(first, second);
  }

  #[test]
  fn rejects_truncated_body() {
    let raw = b"POST /run HTTP/1.1\r\ncontent-length: 10\r\n\r\nhi";
    match decode_request(raw) {
      Err(CodecError::TruncatedBody { expected, found }) => {
        assert_eq!(expected, 10);
        assert_eq!(found, 2);
      }
      other => panic!("expected truncated body error, got {other:?}"),
    }
  }

  #[test]
  fn rejects_garbage() {
    assert!(decode_request(b"not an http request at all").is_err());
    assert!(matches!(
      decode_request(b"GET / HTTP/1.1\r\nincomplete"),
      Err(CodecError::Incomplete)
    ));
  }

  #[test]
  fn request_round_trip_preserves_semantics() {
    let raw = b"POST /function/echo?x=1 HTTP/1.1\r\nhost: gateway\r\nx-trace: abc\r\ncontent-length: 2\r\n\r\nhi";
    let decoded = decode_request(raw).unwrap();
    let rewired = decode_request(&encode_request(&decoded)).unwrap();
    assert_eq!(rewired.method(), decoded.method());
    assert_eq!(rewired.uri(), decoded.uri());
    assert_eq!(rewired.headers()["host"], "gateway");
    assert_eq!(rewired.headers()["x-trace"], "abc");
    assert_eq!(rewired.body(), decoded.body());
  }

  #[test]
  fn encodes_response_in_wire_format() {
    let response = Response::builder()
      .status(200)
      .header("x-served-by", "agent")
      .body(Bytes::from_static(b"HI"))
      .unwrap();
    let wire = encode_response(&response);
    let text = String::from_utf8(wire).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("x-served-by: agent\r\n"));
    assert!(text.contains("content-length: 2\r\n"));
    assert!(text.ends_with("\r\n\r\nHI"));
  }

  #[test]
  fn encoded_response_drops_transfer_encoding() {
    let response = Response::builder()
      .status(200)
      .header("transfer-encoding", "chunked")
      .body(Bytes::from_static(b"data"))
      .unwrap();
    let text = String::from_utf8(encode_response(&response)).unwrap();
    assert!(!text.contains("transfer-encoding"));
    assert!(text.contains("content-length: 4\r\n"));
  }
}
