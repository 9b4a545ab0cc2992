//! Mid-stream transport fallback.
//!
//! When a committed stream dies with a transport or timeout error before
//! reaching a terminal event, the request gets exactly one more chance: a
//! single non-streaming `generate` call against the same adapter, whose
//! full result is replayed as events. Protocol violations and other errors
//! pass through untouched, and a failed fallback surfaces the original
//! transport error.

use futures_util::StreamExt;
use std::sync::Arc;

use crate::traits::{GenerateRequest, ProviderAdapter};
use mm_domain::error::Result;
use mm_domain::stream::{BoxStream, StreamEvent};

/// Wrap an adapter stream with the one-shot non-streaming fallback.
pub fn with_fallback(
    adapter: Arc<dyn ProviderAdapter>,
    req: GenerateRequest,
    inner: BoxStream<'static, Result<StreamEvent>>,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut terminal_seen = false;

        while let Some(item) = inner.next().await {
            match item {
                Ok(event) => {
                    if event.is_terminal() {
                        terminal_seen = true;
                    }
                    yield Ok(event);
                }
                Err(e) if e.is_fallback_eligible() && !terminal_seen => {
                    tracing::warn!(
                        provider = adapter.id(),
                        error = %e,
                        "stream failed mid-flight, attempting non-streaming fallback"
                    );
                    match adapter.generate(&req).await {
                        Ok(completion) => {
                            if !completion.text.is_empty() {
                                yield Ok(StreamEvent::Content { content: completion.text });
                            }
                            if let Some(reasoning) = completion.reasoning {
                                yield Ok(StreamEvent::Reasoning { content: reasoning });
                            }
                            if !completion.images.is_empty() {
                                yield Ok(StreamEvent::Images { images: completion.images });
                            }
                            if let Some(url) = completion.video {
                                yield Ok(StreamEvent::Video { url });
                            }
                            yield Ok(StreamEvent::Done);
                        }
                        Err(fallback_err) => {
                            tracing::warn!(
                                provider = adapter.id(),
                                error = %fallback_err,
                                "non-streaming fallback failed"
                            );
                            // Surface the original stream error.
                            yield Err(e);
                        }
                    }
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
