pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod record;
pub mod retry;
pub mod server;
pub mod sheets;
pub mod storage;
pub mod sync;
pub mod transform;
