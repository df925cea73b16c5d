//! Integration tests module
//!
//! End-to-end tests for ratecast over the in-memory document store, with the
//! render service and the Telegram Bot API mocked by wiremock:
//! - Produce → queue → drain → deliver pipeline
//! - Store outages and render failures

pub mod error_scenarios;
pub mod fixtures;
pub mod pipeline_test;
