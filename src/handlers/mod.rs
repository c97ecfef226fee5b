//! HTTP handlers for the operator surface and tenant-routed records.

pub mod admin;
pub mod records;
