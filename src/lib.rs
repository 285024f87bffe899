//! Vehicle Lookup Library
//!
//! Resolves UK vehicle registration marks (VRMs) into normalized vehicle
//! profiles by combining a government registry and a commercial history
//! provider, with a 30-day payload cache, single-flight deduplication of paid
//! calls and per-call cost accounting.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core resolution logic.
//! - `integrations`: External provider and storage integrations.
//! - `cache_store`: Cache entries, freshness policy and the in-memory store.
//! - `cache_validator`: Payload checksum utilities.
//! - `circuit_breaker`: Per-provider circuit breaker.
//! - `config`: Configuration management.
//! - `cost`: Paid-call ledger.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres cache store.
//! - `derived`: Annual tax and insurance group fallbacks.
//! - `enrichment`: The lookup engine.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `merge`: Per-field provider priority merge.
//! - `models`: Core data models.
//! - `normalization`: Manufacturer rules and hybrid detection.
//! - `orchestrator`: Parallel provider fan-out.
//! - `plate`: Registration mark normalization.
//! - `services`: Provider clients (registry, history).
//! - `single_flight`: Concurrent request collapsing.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod cache_store;
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod cost;
pub mod db;
pub mod db_storage;
pub mod derived;
pub mod enrichment;
pub mod errors;
pub mod handlers;
pub mod merge;
pub mod models;
pub mod normalization;
pub mod orchestrator;
pub mod plate;
pub mod services;
pub mod single_flight;
