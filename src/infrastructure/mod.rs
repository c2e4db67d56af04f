// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_transport;
#[cfg(test)]
pub mod loopback;
pub mod metrics_store;
