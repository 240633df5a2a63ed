//! Per-stream handlers: echo and a one-shot HTTP greeting.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

const MAX_HEAD: usize = 16 * 1024;

/// Copy everything back until the peer closes its side. Returns bytes echoed.
pub async fn echo<S: AsyncRead + AsyncWrite>(stream: S) -> io::Result<u64> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let n = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(n)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a request line and headers, ending at the blank line.
pub fn parse_head(bytes: &[u8]) -> Option<RequestHead> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| {
            let (k, v) = l.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    Some(RequestHead {
        method,
        path,
        headers,
    })
}

/// Read up to the end of the request head. `None` if the peer closes first.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<RequestHead>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return parse_head(&buf[..end + 4])
                .map(Some)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed request head"));
        }
        if buf.len() > MAX_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
}

/// Answer one request with `200 OK` and a greeting, then close.
pub async fn http<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S) -> io::Result<()> {
    let Some(head) = read_head(&mut stream).await? else {
        return Ok(());
    };

    // Identity headers are set by the platform upstream.
    let email = head.header("x-auth-email");
    let name = head.header("x-auth-name");
    if email.is_some() || name.is_some() {
        info!(
            method = %head.method,
            path = %head.path,
            email = email.unwrap_or("-"),
            name = name.unwrap_or("-"),
            "authenticated request"
        );
    }

    let who = name.or(email).unwrap_or("there");
    let body = format!("Hello {who}! Served through Border0.\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_head() {
        let head = parse_head(b"GET /hi HTTP/1.1\r\nHost: x\r\nX-Auth-Email: a@b.c\r\n\r\n").unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/hi");
        assert_eq!(head.header("x-auth-email"), Some("a@b.c"));
        assert_eq!(head.header("HOST"), Some("x"));
        assert_eq!(head.header("x-auth-name"), None);
    }

    #[test]
    fn rejects_empty_request_line() {
        assert!(parse_head(b"\r\n\r\n").is_none());
    }

    #[tokio::test]
    async fn echo_copies_until_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        let task = tokio::spawn(echo(server));
        client.write_all(b"abc").await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(task.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn http_greets_authenticated_user() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(http(server));
        client
            .write_all(b"GET / HTTP/1.1\r\nX-Auth-Name: Ada\r\nX-Auth-Email: ada@example.com\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("Hello Ada! Served through Border0.\n"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn http_tolerates_early_close() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        http(server).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(http(server));
        let junk = vec![b'a'; MAX_HEAD + 2048];
        client.write_all(&junk).await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
