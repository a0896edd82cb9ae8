pub mod batcher;
pub mod coordinator;
pub mod correlator;
pub mod exchange_store;
pub mod rate_limit;
