//! Shared SSE plumbing for all streaming adapters.
//!
//! Both streaming families receive a `reqwest::Response`, buffer chunks,
//! split on `\n\n`, and extract `data:` payloads. The adapters differ only
//! in how they interpret each payload, so this module exposes the payloads
//! as a stream of strings:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from an SSE buffer
//! - [`data_payload_stream`] -- turn a response body into a payload stream

use crate::util::from_reqwest;
use mm_domain::error::Result;
use mm_domain::stream::BoxStream;

/// Pull complete `data:` payloads out of an SSE buffer.
///
/// Event blocks end at `\n\n`; within a block only `data:` lines matter
/// (`event:`, `id:`, and `retry:` lines are dropped). Consumed blocks are
/// removed from the buffer in place, so a trailing partial block survives
/// until the next chunk completes it.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(end) = buffer.find("\n\n") {
        let block: String = buffer.drain(..end + 2).collect();
        for line in block.lines() {
            let Some(rest) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = rest.trim();
            if !payload.is_empty() {
                payloads.push(payload.to_owned());
            }
        }
    }

    payloads
}

/// Turn an SSE `reqwest::Response` into a stream of `data:` payloads.
///
/// The stream:
/// 1. Buffers incoming chunks and drains complete SSE events
/// 2. Flushes the remaining buffer when the response body closes
/// 3. Surfaces transport failures as a final `Err` item
pub(crate) fn data_payload_stream(
    response: reqwest::Response,
) -> BoxStream<'static, Result<String>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        yield Ok(data);
                    }
                }
                Ok(None) => {
                    // Body ended -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            yield Ok(data);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(input: &str) -> (Vec<String>, String) {
        let mut buf = input.to_owned();
        let payloads = drain_data_lines(&mut buf);
        (payloads, buf)
    }

    #[test]
    fn complete_blocks_are_consumed() {
        let (payloads, rest) =
            drain("data: {\"choices\":[]}\n\ndata: {\"usage\":{}}\n\n");
        assert_eq!(payloads, vec!["{\"choices\":[]}", "{\"usage\":{}}"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn partial_block_waits_for_the_next_chunk() {
        let (payloads, rest) = drain("data: whole\n\ndata: half");
        assert_eq!(payloads, vec!["whole"]);
        assert_eq!(rest, "data: half");

        // The next chunk completes it.
        let mut buf = rest;
        buf.push_str(" done\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["half done"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn only_data_lines_survive() {
        let (payloads, _) = drain("event: ping\nid: 7\nretry: 3000\ndata: kept\n\n");
        assert_eq!(payloads, vec!["kept"]);
    }

    #[test]
    fn blank_payloads_and_empty_buffers_yield_nothing() {
        assert!(drain("data: \n\n").0.is_empty());
        assert!(drain("").0.is_empty());
    }

    #[test]
    fn done_sentinel_passes_through_verbatim() {
        let (payloads, _) = drain("data: [DONE]\n\n");
        assert_eq!(payloads, vec!["[DONE]"]);
    }

    #[test]
    fn payload_whitespace_is_trimmed() {
        let (payloads, _) = drain("data:   {\"k\":\"v\"}  \n\n");
        assert_eq!(payloads, vec!["{\"k\":\"v\"}"]);
    }
}
