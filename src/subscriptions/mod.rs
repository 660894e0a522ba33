pub mod service;
pub mod store;

pub use service::SubscriptionService;
pub use store::{JsonFileBackend, MemoryBackend, SubscriptionBackend, SubscriptionStore};
