pub mod broadcast;
pub mod error;
pub mod freshness;
pub mod generator;
pub mod ring;
pub mod store;
pub mod sync;
