pub mod atomic_write;
pub mod canonicalization;
pub mod error;
pub mod logging;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
