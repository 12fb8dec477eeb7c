//! Network clients for the two external services the pipeline talks to.
//!
//! - [`feed`]: downloads and parses journal RSS, RDF and Atom feeds
//! - [`chat`]: an OpenAI-compatible chat-completion client behind the [`LanguageModel`] trait
//!
//! # Examples
//!
//! ```no_run
//! use pulse::{
//!   clients::{ChatClient, FeedReader},
//!   config::Config,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let feeds = FeedReader::new(config.ingest.feed_timeout_secs)?;
//! let model = ChatClient::new(&config.llm)?;
//! # Ok(())
//! # }
//! ```

use quick_xml::de::from_str;

pub mod chat;
pub mod feed;

pub use chat::{ChatClient, ChatRequest, Completion, LanguageModel, Message};
pub use feed::FeedReader;

use super::*;
