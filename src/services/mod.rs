pub mod dedup;
pub mod health;
pub mod ledger;
pub mod llm;
pub mod notification;
pub mod ocr;
pub mod pipeline;
pub mod stability;
pub mod watcher;
