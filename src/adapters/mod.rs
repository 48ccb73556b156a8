pub mod input_validator;
pub mod metrics;
pub mod rate_limit;
pub mod response_cache;
