//! Tools for injecting partial failure. Both transports consult a [`FailureConfigMap`] on every
//! send, so a test can freeze a node, partition a pair, or add jitter without touching OS state.

mod failure_config;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
};
