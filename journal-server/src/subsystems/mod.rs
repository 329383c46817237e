pub mod history;
pub mod prompts;
pub mod relay;
pub mod summarize;
pub mod summary_store;
