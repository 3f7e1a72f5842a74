//! AnswerTips screenshot pipeline
//!
//! Watches a folder for newly written images, extracts their text with a
//! remote OCR service, rewrites that text through an LLM workflow and keeps a
//! bounded in-memory ledger of every attempt.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
