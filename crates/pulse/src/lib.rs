//! Ingestion pipeline for academic-journal feeds.
//!
//! `pulse` turns raw feed entries into durably stored, deduplicated and classified article
//! records:
//!
//! 1. [`clients::feed`] fetches every configured journal feed and keeps today's entries.
//! 2. [`enrich`] asks a language model for a translated title, authors, an abstract and a short
//!    summary, degrading to the original fields when the model misbehaves.
//! 3. [`classify`] assigns research fields with a confidence score, keeping only confident ones.
//! 4. [`database`] stores everything in SQLite and makes re-running the batch idempotent.
//! 5. [`graph`] optionally derives a Mermaid "logic graph" of the article's argument.
//!
//! [`pipeline::Pipeline`] wires the stages together.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pulse::{clients::ChatClient, config::Config, database::Database, pipeline::Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let config = Config::load(None)?;
//!   let model = Arc::new(ChatClient::new(&config.llm)?);
//!   let db = Database::open(Database::default_path()).await?;
//!
//!   let pipeline = Pipeline::new(config, db, model)?;
//!   let report = pipeline.run_today().await;
//!   println!("{report}");
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;

pub mod article;
pub mod classify;
pub mod clients;
pub mod config;
pub mod database;
pub mod enrich;
pub mod errors;
pub mod format;
pub mod graph;
pub mod outcome;
pub mod pipeline;

use article::{Article, FeedEntry, FieldAssignment, LogicGraph, NewArticle};
use clients::LanguageModel;
use config::{Config, JournalConfig, Taxonomy};
use database::Database;
use errors::PulseError;
use outcome::Outcome;
