pub mod jwks;
pub mod key_cache;
pub mod queue;
pub mod status_store;
pub mod token;
