//! Wire-level models for the three LLM dialects the proxy speaks, plus the
//! Copilot catalog shapes and a shared SSE parser.

pub mod chat;
pub mod claude;
pub mod copilot;
pub mod responses;
pub mod sse;
