//! Renewal execution engine: scheduling, cache reuse, acquisition and the
//! store/install pipeline.

pub mod cache_gateway;
pub mod context;
pub mod due_date;
pub mod executor;
pub mod manager;
pub mod pipeline;

pub use cache_gateway::CacheGateway;
pub use context::{OrderContext, OrderScope};
pub use due_date::DueDateService;
pub use executor::RenewalExecutor;
pub use manager::RenewalManager;
pub use pipeline::OrderOutcome;
