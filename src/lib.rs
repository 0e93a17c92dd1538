#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod client;
pub mod config;
pub mod cost;
pub mod dispatch;
pub mod embedding;
pub mod engine;
pub mod files;
pub mod history;
pub mod json_repair;
pub mod logging;
pub mod normalize;
pub mod providers;
pub mod specs;
pub mod sse;
pub mod str_utils;
pub mod tokenizer;
pub mod tools;
pub mod types;

pub use types::*;

pub use engine::{Engine, GenerationHandle, GenerationSpec};
pub use providers::GenerationParams;
