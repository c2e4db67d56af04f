// Domain layer - Message envelopes, tiers and aggregated transfers
pub mod level;
pub mod message;
pub mod payload;
pub mod provenance;
pub mod transfer;
