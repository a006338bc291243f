pub mod breaker;
pub mod dispatcher;
pub mod limiter;
pub mod normalizer;
pub mod proxy;
pub mod registry;
pub mod scorer;
pub mod sink;
pub mod sync;
