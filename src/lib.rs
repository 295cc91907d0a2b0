pub mod auth;
pub mod cache;
pub mod checklist;
pub mod cli {
    pub mod parser;
}
pub mod config;
pub mod coordinator;
pub mod error;
pub mod github {
    pub mod client;
    pub mod fetch;
    pub mod issues;
    pub mod memory;
}
pub mod markdown;
pub mod node;
pub mod output;
pub mod progress;
pub mod repository;
pub mod run;
pub mod storage;
