pub mod audit;
pub mod authz;
pub mod identity;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
