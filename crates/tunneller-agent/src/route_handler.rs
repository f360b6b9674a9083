//! Per-request forwarding for a matched routing rule
//!
//! Opens the backend connection (plain or TLS), forwards the buffered head
//! with the rule's rewrites applied, then splices the remaining bytes in
//! both directions. Requests are accounted against the rule's pattern for
//! the whole exchange.

use crate::http_parser::ParsedHead;
use crate::stats::ConnectionStats;
use crate::tls::{server_name, trust_all_connector};
use crate::tunnel::exchange;
use crate::AgentError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};
use tunneller_router::RoutingRule;

/// Forward one parsed request to the rule's backend and run the exchange
/// until either side finishes
pub async fn handle(
    request_id: &str,
    client: TcpStream,
    head: &ParsedHead,
    rule: &RoutingRule,
    force_connection_close: bool,
    buffer_size: usize,
    stats: &ConnectionStats,
) -> Result<(), AgentError> {
    info!(
        "[{request_id}] route [{}] -> {}:{} ({})",
        rule.path_pattern, rule.target_host, rule.target_port, rule.description
    );

    stats.record(&rule.path_pattern);
    let result = forward(request_id, client, head, rule, force_connection_close, buffer_size).await;
    stats.complete(&rule.path_pattern);
    result
}

async fn forward(
    request_id: &str,
    client: TcpStream,
    head: &ParsedHead,
    rule: &RoutingRule,
    force_connection_close: bool,
    buffer_size: usize,
) -> Result<(), AgentError> {
    if rule.strip_prefix {
        let rewritten = rule.rewrite_path(&head.path);
        if rewritten != head.path {
            info!("[{request_id}] path rewriting: {} -> {rewritten}", head.path);
        }
    }

    let head_bytes = render_head(head, rule, force_connection_close);
    let target = TcpStream::connect((rule.target_host.as_str(), rule.target_port)).await?;

    if rule.use_ssl {
        let connector = trust_all_connector();
        let name = server_name(&rule.target_host)?;
        let mut backend = connector.connect(name, target).await?;
        debug!("[{request_id}] TLS handshake completed");

        backend.write_all(&head_bytes).await?;
        backend.flush().await?;
        exchange(request_id, client, backend, buffer_size).await;
    } else {
        let mut backend = target;
        backend.write_all(&head_bytes).await?;
        backend.flush().await?;
        exchange(request_id, client, backend, buffer_size).await;
    }

    Ok(())
}

/// Render the head to send to the backend: rewritten request line, filtered
/// and injected headers, the blank line, and any body bytes the parse
/// already buffered.
///
/// With all rewrites off the output is byte-identical to the client's head.
pub fn render_head(head: &ParsedHead, rule: &RoutingRule, force_connection_close: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.buffer.len() + 64);

    let effective_path = rule.rewrite_path(&head.path);
    out.extend_from_slice(head.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(effective_path.as_bytes());
    out.push(b' ');
    out.extend_from_slice(head.version.as_bytes());
    out.extend_from_slice(b"\r\n");

    // Header region: everything between the request line and the
    // terminator, or to the end of the buffer if the block is still partial
    let headers_end = head.header_end.unwrap_or(head.buffer.len());
    for line in header_lines(&head.buffer[head.first_line_end..headers_end]) {
        if skip_header(line, rule, force_connection_close) {
            continue;
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    if rule.forward_host {
        out.extend_from_slice(format!("Host: {}\r\n", rule.target_host).as_bytes());
        if let Some(original) = head.host() {
            out.extend_from_slice(format!("X-Forwarded-Host: {original}\r\n").as_bytes());
        }
    }
    if force_connection_close {
        out.extend_from_slice(b"Connection: close\r\n");
    }

    out.extend_from_slice(b"\r\n");

    if let Some(body_start) = head.body_start() {
        out.extend_from_slice(&head.buffer[body_start..]);
    }

    out
}

/// Split a header region into lines, dropping empties; a trailing fragment
/// without its `\r\n` yet counts as a line
fn header_lines(region: &[u8]) -> impl Iterator<Item = &[u8]> {
    region
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
}

fn skip_header(line: &[u8], rule: &RoutingRule, force_connection_close: bool) -> bool {
    if rule.forward_host && starts_with_ignore_case(line, b"host:") {
        return true;
    }
    if force_connection_close
        && (starts_with_ignore_case(line, b"connection:")
            || starts_with_ignore_case(line, b"keep-alive:")
            || starts_with_ignore_case(line, b"proxy-connection:"))
    {
        return true;
    }
    false
}

fn starts_with_ignore_case(line: &[u8], prefix: &[u8]) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_parser::parse_head;
    use std::io::Cursor;

    async fn head_of(input: &[u8]) -> ParsedHead {
        parse_head(&mut Cursor::new(input.to_vec()), 8192)
            .await
            .unwrap()
            .unwrap()
    }

    fn rule(pattern: &str) -> RoutingRule {
        RoutingRule::builder(pattern, "backend.internal", 9000).build().unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_is_byte_equal() {
        let input = b"GET /api/users HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\nbodybytes";
        let head = head_of(input).await;
        let out = render_head(&head, &rule("/api/*"), false);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_strip_prefix_rewrites_request_line() {
        let head = head_of(b"GET /api/users/1 HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let rule = RoutingRule::builder("/api/*", "h", 1).strip_prefix(true).build().unwrap();
        let out = render_head(&head, &rule, false);
        assert!(out.starts_with(b"GET /users/1 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_forward_host_replaces_and_records_original() {
        let head = head_of(b"GET / HTTP/1.1\r\nHost: pub.example\r\nAccept: */*\r\n\r\n").await;
        let rule = RoutingRule::builder("/*", "backend.internal", 1)
            .forward_host(true)
            .build()
            .unwrap();
        let out = render_head(&head, &rule, false);
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("X-Forwarded-Host: pub.example\r\n"));
        assert!(!text.contains("Host: pub.example\r\n"));
        // Exactly one Host header survives
        assert_eq!(text.to_lowercase().matches("\r\nhost:").count(), 1);
        assert!(text.contains("Host: backend.internal\r\n"));
    }

    #[tokio::test]
    async fn test_force_connection_close_filters_and_injects() {
        let head = head_of(
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\nKeep-Alive: timeout=5\r\nProxy-Connection: keep-alive\r\n\r\n",
        )
        .await;
        let out = render_head(&head, &rule("/*"), true);
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.matches("Connection: close\r\n").count(), 1);
        assert!(!text.contains("keep-alive"));
        assert!(!text.contains("Keep-Alive"));
        assert!(!text.contains("Proxy-Connection"));
    }

    #[tokio::test]
    async fn test_body_bytes_forwarded_after_blank_line() {
        let head = head_of(b"POST /x HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd").await;
        let out = render_head(&head, &rule("/*"), false);
        assert!(out.ends_with(b"\r\n\r\nabcd"));
    }

    #[tokio::test]
    async fn test_headers_case_insensitive_filtering() {
        let head = head_of(b"GET / HTTP/1.1\r\nHOST: pub\r\nCONNECTION: keep-alive\r\n\r\n").await;
        let rule = RoutingRule::builder("/*", "b", 1).forward_host(true).build().unwrap();
        let out = render_head(&head, &rule, true);
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("HOST: pub"));
        assert!(!text.contains("CONNECTION"));
        assert!(text.contains("Host: b\r\n"));
        assert!(text.contains("X-Forwarded-Host: pub\r\n"));
        assert!(text.contains("Connection: close\r\n"));
    }
}
