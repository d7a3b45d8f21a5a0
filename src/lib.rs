//! # FilingLens
//!
//! A company-analysis engine over corporate filings and brokerage
//! research reports.
//!
//! FilingLens resolves a company against a filings registry, acquires
//! the most relevant filing plus supplementary brokerage reports,
//! chunks and embeds everything into a local SQLite index, and answers
//! questions with evidence retrieved from that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌─────────────┐   ┌───────────┐
//! │ Registry  │──▶│  Session  │──▶│ Chunk+Embed │──▶│  SQLite   │
//! │ Brokerage │   │ Pipeline  │   │  Pipeline   │   │ Catalog+  │
//! └───────────┘   └─────┬─────┘   └─────────────┘   │  Vectors  │
//!                       │                           └─────┬─────┘
//!                       ▼                                 │
//!                 ┌──────────┐        retrieval           │
//!                 │   LLM    │◀──────────────────────────-┘
//!                 └────┬─────┘
//!                      ▼
//!               ┌────────────┐
//!               │ CLI / HTTP │
//!               └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! flens init                                  # create database
//! flens ask "Acme Corp" "How did revenue develop?"
//! flens stats                                 # what's indexed
//! flens serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`registry`] | Filings registry client |
//! | [`brokerage`] | Brokerage portal scraper |
//! | [`extract`] | Text extraction from PDF/archive/markup payloads |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding providers |
//! | [`catalog`] | Document metadata catalog |
//! | [`index`] | Vector index over chunk embeddings |
//! | [`retrieval`] | Company-filtered similarity search |
//! | [`classify`] | LLM-backed scope and keyword inference |
//! | [`llm`] | Language model routing |
//! | [`session`] | Analysis session orchestration |
//! | [`server`] | HTTP analysis server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod brokerage;
pub mod catalog;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod stats;
