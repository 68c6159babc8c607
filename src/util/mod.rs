//! Common utilities

mod retry;

pub(crate) use retry::{retry, Attempt, RetryError};
