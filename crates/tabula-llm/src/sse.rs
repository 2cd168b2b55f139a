//! # SSE Parser
//!
//! Server-Sent Events parsing for streamed responses:
//! - Line buffering from chunked responses
//! - `data: ` prefix extraction
//! - `[DONE]` marker filtering
//! - Optional processing of a final unterminated line
//!
//! A transport error while reading is yielded as the last item so callers
//! can tell a broken stream from a finished one.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::provider::ProviderError;

/// Options for the SSE parser.
#[derive(Clone, Debug)]
pub struct SseParserOptions {
    /// Whether to process remaining buffer content after the stream ends.
    pub process_remaining_buffer: bool,
}

impl Default for SseParserOptions {
    fn default() -> Self {
        Self {
            process_remaining_buffer: true,
        }
    }
}

/// Parse SSE lines from a byte stream and yield the JSON data strings.
pub fn parse_sse_lines<S, E>(
    byte_stream: S,
    options: &SseParserOptions,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + use<S, E>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<ProviderError> + std::fmt::Display + Send + 'static,
{
    let process_remaining = options.process_remaining_buffer;

    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        move |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };

                    if let Some(data) = extract_sse_data(line) {
                        return Some((Ok(data), (stream, buffer, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                    }
                    Some(Err(e)) => {
                        warn!("SSE stream read error: {e}");
                        return Some((Err(e.into()), (stream, buffer, true)));
                    }
                    None => {
                        if process_remaining && !buffer.is_empty() {
                            let Ok(line) = std::str::from_utf8(&buffer) else {
                                return None;
                            };
                            if let Some(data) = extract_sse_data(line.trim()) {
                                buffer.clear();
                                return Some((Ok(data), (stream, buffer, true)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Extract the data payload from an SSE line.
///
/// Returns `None` for comments, `event:` lines, empty lines and `[DONE]`.
fn extract_sse_data(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send + Unpin + use<> {
        let owned: Vec<Result<Bytes, ProviderError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(parts: &[&str], options: &SseParserOptions) -> Vec<String> {
        parse_sse_lines(chunks(parts), options)
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[test]
    fn extract_data_line() {
        assert_eq!(extract_sse_data("data: {\"a\":1}"), Some("{\"a\":1}".into()));
        assert_eq!(extract_sse_data("data:{\"a\":1}"), Some("{\"a\":1}".into()));
    }

    #[test]
    fn extract_skips_non_data() {
        assert_eq!(extract_sse_data("event: response.created"), None);
        assert_eq!(extract_sse_data(": keep-alive"), None);
        assert_eq!(extract_sse_data("data: [DONE]"), None);
        assert_eq!(extract_sse_data("data: "), None);
        assert_eq!(extract_sse_data(""), None);
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let out = collect(
            &["data: {\"x\"", ":1}\n\nda", "ta: {\"y\":2}\r\n", "data: [DONE]\n"],
            &SseParserOptions::default(),
        )
        .await;
        assert_eq!(out, vec!["{\"x\":1}", "{\"y\":2}"]);
    }

    #[tokio::test]
    async fn remaining_buffer_is_optional() {
        let parts = ["data: {\"a\":1}\n", "data: {\"b\":2}"];
        let with = collect(&parts, &SseParserOptions::default()).await;
        assert_eq!(with.len(), 2);
        let without = collect(
            &parts,
            &SseParserOptions {
                process_remaining_buffer: false,
            },
        )
        .await;
        assert_eq!(without, vec!["{\"a\":1}"]);
    }

    #[tokio::test]
    async fn read_error_is_yielded_last() {
        let items: Vec<Result<Bytes, ProviderError>> = vec![
            Ok(Bytes::from("data: {\"a\":1}\n")),
            Err(ProviderError::Other {
                message: "reset".into(),
            }),
            Ok(Bytes::from("data: {\"b\":2}\n")),
        ];
        let out: Vec<_> = parse_sse_lines(futures::stream::iter(items), &SseParserOptions::default())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
    }

    proptest::proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_output(
            values in proptest::collection::vec(0_u32..1000, 1..8),
            cuts in proptest::collection::vec(0_usize..400, 0..6),
        ) {
            let expected: Vec<String> = values.iter().map(|v| format!("{{\"v\":{v}}}")).collect();
            let body: String = expected.iter().map(|d| format!("data: {d}\n\n")).collect();

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (body.len() + 1)).collect();
            cuts.sort_unstable();
            let mut parts = Vec::new();
            let mut start = 0;
            for cut in cuts {
                parts.push(&body[start..cut]);
                start = cut;
            }
            parts.push(&body[start..]);

            let out = futures::executor::block_on(collect(&parts, &SseParserOptions::default()));
            proptest::prop_assert_eq!(out, expected);
        }
    }
}
