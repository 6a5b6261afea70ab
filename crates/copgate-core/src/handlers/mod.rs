pub mod chat_completions;
pub mod count_tokens;
pub mod messages;
pub mod messages_native;
pub mod misc;
pub mod models;
pub mod responses;
