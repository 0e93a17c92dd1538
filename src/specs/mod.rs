//! Provider wire schemas, request and stream-event shapes as serde types.

pub mod anthropic;
pub mod cohere;
pub mod openai;
