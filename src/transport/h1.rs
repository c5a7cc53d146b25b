//! HTTP/1.1 request/response exchange over a single dialed stream.
//!
//! Uses httparse for response parsing. Connections are not reused: every
//! request is sent with `Connection: close` on a freshly dialed stream, so
//! each attempt goes through the whole dial chain (pinning, proxy fallback).

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::dialer::MaybeHttpsStream;

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Maximum response body size (32MB).
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// One-shot HTTP/1.1 connection.
pub struct H1Connection {
    stream: MaybeHttpsStream,
    buffer: Vec<u8>,
}

impl H1Connection {
    pub fn new(stream: MaybeHttpsStream) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Send a request and read the final (non-1xx) response.
    pub async fn send_request(
        mut self,
        method: &Method,
        target: &str,
        host: &str,
        headers: &[(String, String)],
        body: Option<&Bytes>,
    ) -> Result<Response> {
        let head = encode_request_head(method, target, host, headers, body)?;
        self.stream
            .write_all(&head)
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to write request: {}", e)))?;
        if let Some(body) = body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::http_protocol(format!("Failed to write body: {}", e)))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to flush: {}", e)))?;

        loop {
            let response = self.read_response(method).await?;
            // 1xx responses carry no body; the final response follows.
            if !(100..200).contains(&response.status) {
                return Ok(response);
            }
        }
    }

    async fn fill(&mut self, context: &str) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to read {}: {}", context, e)))?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn read_response(&mut self, method: &Method) -> Result<Response> {
        while find_header_end(&self.buffer).is_none() {
            if self.buffer.len() >= MAX_HEADERS_SIZE {
                return Err(Error::http_protocol("Response headers too large"));
            }
            if self.fill("response").await? == 0 {
                return Err(Error::http_protocol(
                    "Connection closed before response complete",
                ));
            }
        }

        let (status, version, headers, head_len) = parse_head(&self.buffer)?;
        self.buffer.drain(..head_len);

        let has_body = !matches!(status, 100..=199 | 204 | 304) && *method != Method::HEAD;
        if !has_body {
            return Ok(Response::new(status, headers, Bytes::new(), version));
        }

        let transfer_encoding = find_header_value(&headers, "transfer-encoding");
        let is_chunked = transfer_encoding
            .and_then(|v| v.split(',').next_back())
            .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        let body = if is_chunked {
            self.read_chunked_body().await?
        } else if transfer_encoding.is_none() {
            match find_header_value(&headers, "content-length") {
                Some(value) => {
                    let len = parse_content_length(value)?;
                    self.read_fixed_body(len).await?
                }
                None => self.read_until_close().await?,
            }
        } else {
            self.read_until_close().await?
        };

        Ok(Response::new(status, headers, body, version))
    }

    async fn read_fixed_body(&mut self, len: usize) -> Result<Bytes> {
        if len > MAX_BODY_SIZE {
            return Err(body_too_large());
        }
        while self.buffer.len() < len {
            if self.fill("body").await? == 0 {
                return Err(Error::http_protocol(format!(
                    "Connection closed before receiving full body (got {} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        Ok(Bytes::from(self.buffer.drain(..len).collect::<Vec<_>>()))
    }

    async fn read_until_close(&mut self) -> Result<Bytes> {
        while self.fill("body (close-delimited)").await? > 0 {
            if self.buffer.len() > MAX_BODY_SIZE {
                return Err(body_too_large());
            }
        }
        Ok(Bytes::from(std::mem::take(&mut self.buffer)))
    }

    async fn read_chunked_body(&mut self) -> Result<Bytes> {
        let mut body = Vec::new();
        loop {
            let (size, line_end) = loop {
                if let Some(found) = find_chunk_size(&self.buffer)? {
                    break found;
                }
                if self.buffer.len() > MAX_HEADERS_SIZE {
                    return Err(Error::http_protocol("Chunk size line too long"));
                }
                if self.fill("chunk size").await? == 0 {
                    return Err(Error::http_protocol(
                        "Connection closed while reading chunk size",
                    ));
                }
            };
            self.buffer.drain(..line_end);

            if size == 0 {
                self.skip_trailers().await?;
                return Ok(Bytes::from(body));
            }

            if size > MAX_BODY_SIZE - body.len() {
                return Err(body_too_large());
            }
            // Bounded by MAX_BODY_SIZE above.
            let chunk_end = size + 2;
            while self.buffer.len() < chunk_end {
                if self.fill("chunk data").await? == 0 {
                    return Err(Error::http_protocol(
                        "Connection closed while reading chunk data",
                    ));
                }
            }
            if self.buffer[size..chunk_end] != *b"\r\n" {
                return Err(Error::http_protocol("Missing CRLF after chunk data"));
            }
            body.extend_from_slice(&self.buffer[..size]);
            self.buffer.drain(..chunk_end);
        }
    }

    /// Skip the trailer section up to and including the terminating empty line.
    async fn skip_trailers(&mut self) -> Result<()> {
        loop {
            match find_crlf(&self.buffer) {
                Some(0) => {
                    self.buffer.drain(..2);
                    return Ok(());
                }
                Some(pos) => {
                    self.buffer.drain(..pos + 2);
                }
                None => {
                    if self.fill("trailers").await? == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn body_too_large() -> Error {
    Error::http_protocol(format!("Response body exceeds {} bytes", MAX_BODY_SIZE))
}

/// Check everything the caller controls before any connection is made.
pub(crate) fn validate_request(target: &str, headers: &[(String, String)]) -> Result<()> {
    if target.is_empty() || target.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(Error::invalid_request(format!(
            "Invalid request target: {:?}",
            target
        )));
    }
    for (name, value) in headers {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }
    Ok(())
}

fn encode_request_head(
    method: &Method,
    target: &str,
    host: &str,
    headers: &[(String, String)],
    body: Option<&Bytes>,
) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    head.extend_from_slice(host.as_bytes());
    head.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        validate_header_name(name)?;
        validate_header_value(value)?;
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    head.extend_from_slice(b"Connection: close\r\n");
    let body_len = body.map(|b| b.len()).unwrap_or(0);
    if body.is_some() || matches!(*method, Method::POST | Method::PUT) {
        head.extend_from_slice(format!("Content-Length: {}\r\n", body_len).as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    Ok(head)
}

fn parse_head(buffer: &[u8]) -> Result<(u16, String, Vec<String>, usize)> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);
    let head_len = match response
        .parse(buffer)
        .map_err(|e| Error::http_protocol(format!("Failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => {
            return Err(Error::http_protocol("Incomplete response headers"));
        }
    };
    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("Missing status code"))?;
    let version = format!("HTTP/1.{}", response.version.unwrap_or(1));
    let headers = response
        .headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| format!("{}: {}", h.name, String::from_utf8_lossy(h.value)))
        .collect();
    Ok((status, version, headers, head_len))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

fn find_header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|header| {
        let (key, value) = header.split_once(": ")?;
        key.eq_ignore_ascii_case(name).then_some(value)
    })
}

/// Parse a chunk size line, returning (size, end_of_line_position), or
/// `None` while the line is incomplete. Chunk extensions after `;` are ignored.
fn find_chunk_size(buffer: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(line_end) = find_crlf(buffer) else {
        return Ok(None);
    };
    let invalid = || Error::http_protocol("Invalid chunk size line");
    let line = std::str::from_utf8(&buffer[..line_end]).map_err(|_| invalid())?;
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let size = usize::from_str_radix(size, 16).map_err(|_| invalid())?;
    Ok(Some((size, line_end + 2)))
}

/// Header names must be RFC 9110 tokens.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(is_tchar) {
        return Err(Error::invalid_request(format!(
            "Invalid header name: {:?}",
            name
        )));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Header values must not contain NUL, CR, or LF.
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::invalid_request(
            "Invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}

/// Content-Length must be a non-negative integer; repeated values must agree.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parsed = value.split(',').map(|part| {
        part.trim()
            .parse::<usize>()
            .map_err(|_| Error::http_protocol(format!("Invalid Content-Length: {}", value)))
    });
    let first = parsed
        .next()
        .ok_or_else(|| Error::http_protocol("Empty Content-Length"))??;
    for other in parsed {
        if other? != first {
            return Err(Error::http_protocol(format!(
                "Conflicting Content-Length values: {}",
                value
            )));
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_head_layout() {
        let headers = vec![
            ("x-pm-appversion".to_string(), "Other".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
        ];
        let body = Bytes::from_static(b"{}");
        let head =
            encode_request_head(&Method::POST, "/auth/refresh", "api.test", &headers, Some(&body))
                .unwrap();
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("POST /auth/refresh HTTP/1.1\r\nHost: api.test\r\n"));
        assert!(head.contains("x-pm-appversion: Other\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(!head.contains("keep-alive"));
        assert!(head.ends_with("Content-Length: 2\r\n\r\n"));
    }

    #[test]
    fn test_header_injection_rejected() {
        let headers = vec![("x-pm-uid".to_string(), "abc\r\nEvil: 1".to_string())];
        assert!(encode_request_head(&Method::GET, "/", "h", &headers, None).is_err());
        let headers = vec![("bad name".to_string(), "v".to_string())];
        assert!(encode_request_head(&Method::GET, "/", "h", &headers, None).is_err());
    }

    #[test]
    fn test_find_chunk_size() {
        assert_eq!(find_chunk_size(b"5\r\nhello").unwrap(), Some((5, 3)));
        assert_eq!(find_chunk_size(b"ff;ext=1\r\n").unwrap(), Some((255, 10)));
        assert_eq!(find_chunk_size(b"0\r\n").unwrap(), Some((0, 3)));
        assert_eq!(find_chunk_size(b"10").unwrap(), None);
        assert!(find_chunk_size(b"zz\r\n").is_err());
        assert!(find_chunk_size(b"+5\r\n").is_err());
        // Does not fit in usize.
        assert!(find_chunk_size(b"1ffffffffffffffff\r\n").is_err());
    }

    #[test]
    fn test_validate_request() {
        let ok = vec![("x-pm-uid".to_string(), "abc".to_string())];
        assert!(validate_request("/tests/ping", &ok).is_ok());
        assert!(matches!(
            validate_request("/a b", &ok),
            Err(Error::InvalidRequest(_))
        ));
        let bad = vec![("x-pm-uid".to_string(), "abc\r\nEvil: 1".to_string())];
        assert!(matches!(
            validate_request("/", &bad),
            Err(Error::InvalidRequest(_))
        ));
    }

    /// Serve `raw` as the response to whatever request arrives.
    async fn exchange(raw: &'static [u8]) -> Result<Response> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;
            let _ = stream.write_all(raw).await;
            let _ = stream.shutdown().await;
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        H1Connection::new(MaybeHttpsStream::Http(stream))
            .send_request(&Method::GET, "/", "127.0.0.1", &[], None)
            .await
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let response = exchange(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(response.body().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let result = exchange(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc",
        )
        .await;
        assert!(matches!(result, Err(Error::HttpProtocol(_))));
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected() {
        let result =
            exchange(b"HTTP/1.1 200 OK\r\nContent-Length: 99999999999\r\n\r\nabc").await;
        assert!(matches!(result, Err(Error::HttpProtocol(_))));
    }

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length("42").unwrap(), 42);
        assert_eq!(parse_content_length("7, 7").unwrap(), 7);
        assert!(parse_content_length("7, 8").is_err());
        assert!(parse_content_length("-1").is_err());
    }

    #[test]
    fn test_parse_head() {
        let raw = b"HTTP/1.1 429 Too Many Requests\r\nRetry-After: 1\r\nContent-Length: 0\r\n\r\n";
        let (status, version, headers, len) = parse_head(raw).unwrap();
        assert_eq!(status, 429);
        assert_eq!(version, "HTTP/1.1");
        assert_eq!(find_header_value(&headers, "retry-after"), Some("1"));
        assert_eq!(len, raw.len());
    }
}
