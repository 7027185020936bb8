//! DocSphere: a conversational health-information backend.
//!
//! User questions are screened for emergency indicators, combined with
//! bounded conversation history, answered by an OpenAI-compatible language
//! model and persisted to SQLite together with safety metadata.

pub mod config;
pub mod doctor;
pub mod error;
pub mod http;
pub mod llm;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
