//! Bounded HTTP/1.x head parser
//!
//! Reads the start of a request into a single fixed-size buffer, far enough
//! to decode the request line. The header block may still be incomplete at
//! return time; whatever was read is kept in [`ParsedHead::buffer`] so the
//! caller can forward it verbatim and stream the rest afterwards.
//!
//! A head that does not fit the buffer, or a request line that does not
//! tokenize, is a dropped request, not an error: this is a forwarder, not
//! an HTTP normalizer.

use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Everything learned from the buffered head of one request
#[derive(Debug, Clone)]
pub struct ParsedHead {
    /// Request method, e.g. `GET`
    pub method: String,
    /// Request path, e.g. `/api/users/123`
    pub path: String,
    /// Protocol version, e.g. `HTTP/1.1`
    pub version: String,
    /// Header names (lowercased) to values; duplicates fold last-wins.
    /// Only headers whose full line made it into the buffer appear here.
    pub headers: HashMap<String, String>,
    /// All bytes read so far, request line included
    pub buffer: Vec<u8>,
    /// Offset just past the `\r\n` terminating the request line
    pub first_line_end: usize,
    /// Offset of the `\r\n\r\n` header terminator, if it is in the buffer
    pub header_end: Option<usize>,
}

impl ParsedHead {
    /// Offset of the first body byte in [`buffer`](Self::buffer), when the
    /// header terminator has been seen
    pub fn body_start(&self) -> Option<usize> {
        self.header_end.map(|end| end + 4)
    }

    /// Original `Host` header value, if buffered
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host").map(String::as_str)
    }
}

/// Read and decode the head of a request from `stream`.
///
/// Reads until the request line's `\r\n` is in the buffer; each read pulls
/// whatever else the peer already sent, so headers and body bytes often ride
/// along. Returns `Ok(None)` when the stream ends first, when `buffer_size`
/// bytes arrive without a `\r\n`, or when the request line does not split
/// into method, path and version.
pub async fn parse_head<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer_size: usize,
) -> io::Result<Option<ParsedHead>> {
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0;
    let mut line_end = None;

    while total < buffer.len() {
        let n = stream.read(&mut buffer[total..]).await?;
        if n == 0 {
            debug!("connection closed before request line");
            return Ok(None);
        }

        // Scan from one byte before the new data in case the \r\n pair
        // straddles two reads
        let scan_from = total.saturating_sub(1);
        total += n;
        if let Some(pos) = find_crlf(&buffer[..total], scan_from) {
            line_end = Some(pos);
            break;
        }
    }

    let Some(crlf) = line_end else {
        debug!("no request line within {buffer_size} bytes");
        return Ok(None);
    };

    let first_line = String::from_utf8_lossy(&buffer[..crlf]).into_owned();
    let mut parts = first_line.split(' ');
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        debug!("malformed request line: {first_line:?}");
        return Ok(None);
    };
    if method.is_empty() || path.is_empty() || version.is_empty() {
        debug!("malformed request line: {first_line:?}");
        return Ok(None);
    }

    let first_line_end = crlf + 2;
    buffer.truncate(total);

    let header_end = find_header_end(&buffer, first_line_end);
    let headers = parse_headers(&buffer, first_line_end, header_end.unwrap_or(total));

    Ok(Some(ParsedHead {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
        headers,
        buffer,
        first_line_end,
        header_end,
    }))
}

fn find_crlf(buffer: &[u8], from: usize) -> Option<usize> {
    buffer[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| from + pos)
}

fn find_header_end(buffer: &[u8], from: usize) -> Option<usize> {
    // The terminator may begin at the request line's own \r\n
    let from = from.saturating_sub(2);
    buffer[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| from + pos)
}

/// Fold complete `name: value` lines in `buffer[start..end]` into a map,
/// lowercasing names; the last occurrence of a name wins
fn parse_headers(buffer: &[u8], start: usize, end: usize) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let region = &buffer[start..end.min(buffer.len())];

    let mut offset = 0;
    while let Some(pos) = find_crlf(region, offset) {
        let line = &region[offset..pos];
        offset = pos + 2;
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(line);
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn parse(input: &[u8]) -> Option<ParsedHead> {
        parse_head(&mut Cursor::new(input.to_vec()), 8192).await.unwrap()
    }

    #[tokio::test]
    async fn test_parse_simple_request() {
        let head = parse(b"GET /api/users HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/api/users");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.host(), Some("x"));
        assert_eq!(head.first_line_end, 25);
        assert_eq!(head.header_end, Some(head.buffer.len() - 4));
    }

    #[tokio::test]
    async fn test_buffer_keeps_everything_read() {
        let input = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let head = parse(input).await.unwrap();
        assert_eq!(&head.buffer, input);
        let body_start = head.body_start().unwrap();
        assert_eq!(&head.buffer[body_start..], b"hello");
    }

    #[tokio::test]
    async fn test_headers_lowercased_last_wins() {
        let head = parse(b"GET / HTTP/1.1\r\nX-Tag: one\r\nx-tag: two\r\nHost: h\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(head.headers.get("x-tag").map(String::as_str), Some("two"));
        assert_eq!(head.host(), Some("h"));
    }

    #[tokio::test]
    async fn test_partial_header_block() {
        // Request line complete, header block still streaming
        let head = parse(b"GET /x HTTP/1.1\r\nHost: h\r\nX-Part").await.unwrap();
        assert_eq!(head.path, "/x");
        assert_eq!(head.header_end, None);
        assert_eq!(head.body_start(), None);
        // Complete header lines are decoded, the partial one is not
        assert_eq!(head.host(), Some("h"));
        assert!(!head.headers.contains_key("x-part"));
    }

    #[tokio::test]
    async fn test_empty_stream_is_dropped() {
        assert!(parse(b"").await.is_none());
    }

    #[tokio::test]
    async fn test_no_crlf_within_buffer_is_dropped() {
        let long = vec![b'a'; 10_000];
        assert!(parse(&long).await.is_none());
    }

    #[tokio::test]
    async fn test_request_line_with_too_few_tokens_is_dropped() {
        assert!(parse(b"GET /missing-version\r\n\r\n").await.is_none());
        assert!(parse(b"\r\n\r\n").await.is_none());
    }

    #[tokio::test]
    async fn test_crlf_straddling_reads() {
        // Cursor delivers everything in one read, so force two reads with a
        // reader that splits between the \r and the \n
        struct TwoPart(Vec<Vec<u8>>);
        impl AsyncRead for TwoPart {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                if let Some(chunk) = self.0.pop() {
                    buf.put_slice(&chunk);
                }
                std::task::Poll::Ready(Ok(()))
            }
        }

        let mut reader = TwoPart(vec![b"\nHost: h\r\n\r\n".to_vec(), b"GET / HTTP/1.1\r".to_vec()]);
        let head = parse_head(&mut reader, 8192).await.unwrap().unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.first_line_end, 16);
    }
}
