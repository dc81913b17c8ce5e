pub mod batch;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod extract;
pub mod library;
pub mod output;
pub mod paginator;
pub mod pipeline;
pub mod session;
pub mod upload;
