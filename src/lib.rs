//! # nbtables
//!
//! Convert Jupyter notebooks into relational tables inside a SQLite
//! database.
//!
//! A notebook is a semi-structured document: ordered cells with source text
//! and outputs, plus free-form metadata. nbtables walks it and derives a
//! fixed family of tables, creating each on first use and appending to it
//! when later notebooks are converted into the same database.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────┐   ┌────────────┐
//! │   Loader   │──▶│ DocumentConverter │──▶│ TableStore │
//! │ file / URL │   │  RowProjector     │   │  SQLite    │
//! └────────────┘   └─────────┬─────────┘   └────────────┘
//!                            ▼
//!                    ┌────────────────┐
//!                    │ ResultReporter │
//!                    └────────────────┘
//! ```
//!
//! ## Tables
//!
//! | Table | Rows |
//! |-------|------|
//! | `cells_source` | one per source line |
//! | `cells_outputs` | one per output text line, data line, or image |
//! | `cells_outputs_kv` | remaining output fields |
//! | `cells_kv` | remaining cell fields |
//! | `metadata_kernelspec`, `metadata_language_info`, `metadata_kv` | metadata blocks |
//! | `kv` | `nbformat`, `nbformat_minor` |
//! | `_source_info_` | provenance: which source produced which table |
//!
//! ## Quick Start
//!
//! ```bash
//! nbt init                          # create database
//! nbt file analysis.ipynb notebooks/
//! nbt url https://example.com/nb.ipynb --proxy http://proxy:3128
//! nbt stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Notebook types, row values, column definitions |
//! | [`store`] | Destination store trait and backends |
//! | [`naming`] | Table naming and section capabilities |
//! | [`project`] | Row projection |
//! | [`convert`] | Document conversion |
//! | [`report`] | Result reporting |
//! | [`load`] | Notebook loading |
//! | [`upgrade`] | nbformat 3 to 4 upgrade |
//! | [`ingest`] | CLI conversion pipeline |
//! | [`stats`] | Database summary |
//! | [`db`] | Database connection |
//! | [`migrate`] | Provenance schema |

pub mod config;
pub mod convert;
pub mod db;
pub mod ingest;
pub mod load;
pub mod migrate;
pub mod models;
pub mod naming;
pub mod project;
pub mod report;
pub mod stats;
pub mod store;
pub mod upgrade;
