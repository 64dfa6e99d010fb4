pub mod cache;
pub mod commands;
pub mod config;
pub mod fingerprint;
pub mod proxy;
pub mod queue;
pub mod rate_limit;
pub mod recognition;
pub mod scan;
pub mod shutdown;
pub mod stats;
pub mod tor;
pub mod worker;
