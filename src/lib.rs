//! # qbank
//!
//! A staging and review pipeline for bulk-importing question banks.
//!
//! qbank parses semi-structured markdown documents into candidate
//! question/answer records, validates them against a configurable taxonomy,
//! flags likely duplicates with trigram similarity, and holds everything in
//! a staging area until a human reviewer approves, rejects, or resolves
//! each record. Approved records are then imported into the authoritative
//! content table with per-record failure isolation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌───────────┐
//! │ Document │──▶│  Pipeline                  │──▶│  SQLite    │
//! │ (.md)    │   │ Parse+Validate+Assign+Dedup│   │ staging +  │
//! └──────────┘   └───────────────────────────┘   │ questions  │
//!                                                 └─────┬─────┘
//!                              review / resolve         │
//!                      ┌────────────────────────────────┤
//!                      ▼                                ▼
//!                 ┌──────────┐                    ┌──────────┐
//!                 │   CLI    │                    │   HTTP   │
//!                 │ (qbank)  │                    │  (JSON)  │
//!                 └──────────┘                    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qbank init                          # create database
//! qbank upload questions.md           # parse, validate, stage
//! qbank show <batch-id>               # inspect staged records
//! qbank approve <batch-id> <ids...>   # review
//! qbank import <batch-id>             # commit approved records
//! qbank serve                         # start the JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and status enums |
//! | [`error`] | Operation error taxonomy |
//! | [`parser`] | Document grammar parsing |
//! | [`validate`] | Taxonomy validation |
//! | [`identifier`] | Semantic identifier assignment |
//! | [`similarity`] | Trigram similarity scoring |
//! | [`dedup`] | Duplicate detection |
//! | [`batch`] | Batch lifecycle rules |
//! | [`store`] | Staging store persistence |
//! | [`ingest`] | Upload pipeline orchestration |
//! | [`review`] | Review orchestration |
//! | [`import`] | Import into the authoritative store |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod identifier;
pub mod import;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod review;
pub mod server;
pub mod similarity;
pub mod store;
pub mod validate;
