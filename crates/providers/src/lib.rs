//! Provider adapters for the ModelMux gateway.
//!
//! Three adapter families cover every configured backend:
//! - [`delta_chat`] — OpenAI-compatible chat completions (token deltas,
//!   inline multimodal parts, tool calls).
//! - [`native_sse`] — Gemini-style `generateContent` raw SSE.
//! - [`video_task`] — submit-then-poll video generation.
//!
//! All of them translate their provider's wire format into the canonical
//! [`mm_domain::stream::StreamEvent`] vocabulary. [`extract`] holds the pure
//! content extractor shared by the non-streaming paths, and [`fallback`]
//! wraps streams with the one-shot non-streaming fallback.

pub mod delta_chat;
pub mod extract;
pub mod fallback;
pub mod native_sse;
pub mod registry;
mod sse;
pub mod tools;
pub mod traits;
pub mod util;
pub mod video_task;
