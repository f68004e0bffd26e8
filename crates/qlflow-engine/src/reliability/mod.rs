//! Retry, circuit breaking, and bulkhead isolation

mod bulkhead;
mod circuit_breaker;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadRegistry};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;
