//! Validation plugins complete the authority's challenges for a batch of orders.

mod self_hosting;

pub use self_hosting::{SELF_HOSTING_VALIDATOR, SelfHostingValidator};
