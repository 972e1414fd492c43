pub mod async_engine;
pub mod capability_cache;
pub mod concurrency;
pub mod config;
pub mod providers;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod sync_engine;
pub mod tools;
