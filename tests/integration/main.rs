//! Integration tests for Snapwire
//!
//! These tests use wiremock to stand in for news sites and exercise capture,
//! deep scans and the archive end-to-end.

mod common;

mod capture_tests;
mod deep_scan_tests;
mod storage_tests;
