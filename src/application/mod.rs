// Application layer - Services, policies and the contracts they depend on
pub mod aggregation_service;
pub mod branch_collector;
pub mod communication_service;
pub mod data_provider;
pub mod endpoint_handler;
pub mod error;
pub mod escalation;
pub mod metrics_provider;
pub mod regional_handler;
pub mod scheduler;
pub mod tier_state;
pub mod transport;
