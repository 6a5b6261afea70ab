//! Translation layer between the Anthropic Messages dialect and the two
//! OpenAI-shaped Copilot backends, plus the request normalizer that runs
//! before routing.

pub mod chat;
pub mod count_tokens;
pub mod normalize;
pub mod responses;
