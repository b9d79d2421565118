//! Per-tenant S3 bucket configurations.
//!
//! A tenant with any configuration has exactly one default; the partial
//! unique index on `is_default` backs the service-level checks.

pub mod handlers;
pub mod service;
