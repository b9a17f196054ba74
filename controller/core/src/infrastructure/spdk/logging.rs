// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transport wrapper that traces every byte chunk crossing the backend
//! socket. Bytes pass through unchanged; only the traced text has the
//! string values of credential fields (`"key"`, `"secret"`) masked.
//!
//! Enable with `RUST_LOG=oim::backend::wire=trace`.

use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

pub const WIRE_TARGET: &str = "oim::backend::wire";

const SECRET_FIELDS: &[&str] = &["\"key\"", "\"secret\"", "\"password\""];
const MASK: &str = "***";

/// Mask the string value following any credential field name. A value split
/// across two chunks is masked only in the chunk holding its field name.
pub fn redact(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let Some(field) = SECRET_FIELDS.iter().find(|f| bytes[i..].starts_with(f.as_bytes())) else {
            i += 1;
            continue;
        };
        let skip_ws = |mut j: usize| {
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            j
        };
        let colon = skip_ws(i + field.len());
        if bytes.get(colon) != Some(&b':') {
            i += field.len();
            continue;
        }
        let quote = skip_ws(colon + 1);
        if bytes.get(quote) != Some(&b'"') {
            i = quote;
            continue;
        }

        let start = quote + 1;
        let mut end = start;
        let mut escaped = false;
        while end < bytes.len() {
            match bytes[end] {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => break,
                _ => {}
            }
            end += 1;
        }

        out.push_str(&text[copied..start]);
        out.push_str(MASK);
        copied = end;
        i = end;
    }

    if copied == 0 {
        Cow::Borrowed(text)
    } else {
        out.push_str(&text[copied..]);
        Cow::Owned(out)
    }
}

pub struct LoggingStream<S> {
    inner: S,
}

impl<S> LoggingStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LoggingStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let chunk = &buf.filled()[before..];
            if chunk.is_empty() {
                trace!(target: WIRE_TARGET, "<- EOF");
            } else {
                trace!(
                    target: WIRE_TARGET,
                    bytes = chunk.len(),
                    "<- {}",
                    redact(&String::from_utf8_lossy(chunk))
                );
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LoggingStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &result {
            trace!(
                target: WIRE_TARGET,
                bytes = *written,
                "-> {}",
                redact(&String::from_utf8_lossy(&buf[..*written]))
            );
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
