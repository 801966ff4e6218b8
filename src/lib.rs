//! Purpose: Library crate behind the `pdsview` binary and its integration tests.
//! Exports: `core` (keyset pagination, block/mute exclusion, errors) and `api` (read paths).
//! Role: Read path of a personal data server that can defer reads to an aggregator.
//! Invariants: Core modules are storage-agnostic and perform no I/O.
pub mod api;
pub mod core;
