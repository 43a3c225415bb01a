//! `Content-Length` framing: a header block terminated by a blank line,
//! followed by exactly that many body bytes. Header keys are matched
//! case-insensitively; unparseable header lines are skipped.

use {
    tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    tracing::warn,
};

use crate::error::{Context, Result};

/// Read one framed message. `Ok(None)` means the stream ended (EOF before
/// any header) or the header block carried no usable `Content-Length`,
/// which callers treat as end of input.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().ok();
        }
    }

    let Some(len) = content_length.filter(|len| *len > 0) else {
        warn!("message without a usable Content-Length header, stopping");
        return Ok(None);
    };

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .with_context(|| format!("reading {len}-byte message body"))?;
    Ok(Some(body))
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes())
        .await
        .context("writing frame header")?;
    writer.write_all(body).await.context("writing frame body")?;
    writer.flush().await.context("flushing frame")?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn read_from(input: &[u8]) -> Option<Vec<u8>> {
        let mut reader = tokio::io::BufReader::new(input);
        read_message(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_exact_body() {
        let body = read_from(b"Content-Length: 5\r\n\r\nhello").await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_header_key_is_case_insensitive() {
        let body = read_from(b"CONTENT-LENGTH: 2\r\n\r\nok").await.unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_extra_headers_and_junk_lines_ignored() {
        let input = b"X-Custom: yes\r\nnot a header\r\nContent-Length: 3\r\n\r\nabc";
        let body = read_from(input).await.unwrap();
        assert_eq!(body, b"abc");
    }

    #[tokio::test]
    async fn test_bare_lf_terminator() {
        let body = read_from(b"Content-Length: 1\n\nz").await.unwrap();
        assert_eq!(body, b"z");
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        assert!(read_from(b"").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length_returns_none() {
        assert!(read_from(b"X-Other: 1\r\n\r\n").await.is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_reports_context() {
        let mut reader = tokio::io::BufReader::new(&b"Content-Length: 10\r\n\r\nshort"[..]);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("reading 10-byte message body"));
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let mut buf = Vec::new();
        write_message(&mut buf, br#"{"jsonrpc":"2.0"}"#).await.unwrap();
        let body = read_from(&buf).await.unwrap();
        assert_eq!(body, br#"{"jsonrpc":"2.0"}"#);
    }

    #[tokio::test]
    async fn test_two_messages_back_to_back() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"first").await.unwrap();
        write_message(&mut buf, b"second").await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), b"first");
        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), b"second");
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }
}
