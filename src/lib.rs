pub mod cli;
pub mod constants;
pub mod dataset;
pub mod filter;
pub mod loader;
pub mod publish;
pub mod record;
pub mod refresh;
pub mod server;
pub mod source;
pub mod storage;
pub mod store;
