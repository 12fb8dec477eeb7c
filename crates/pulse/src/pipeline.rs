//! Batch ingestion and the maintenance jobs built on the same stages.
//!
//! [`Pipeline::run_batch`] drives one daily ingest:
//!
//! ```text
//! feeds ─► exists? ─► enrich ─► insert ─► classify ─► upsert fields ─► logic graph
//!            │                    │
//!            └─ skip duplicate ◄──┘
//! ```
//!
//! Entries are processed one at a time in feed order. Model failures degrade the affected
//! article and store failures are logged against the entry's link; neither stops the batch,
//! and the final [`BatchReport`] always carries the counts.

use std::fmt;

use chrono::Local;

use super::*;
use crate::{
  classify::{passes_threshold, FieldClassifier},
  clients::FeedReader,
  database::{SaveOutcome, SaveReport},
  enrich::Enricher,
  format,
  graph::{GeneratedGraph, LogicGraphGenerator},
};

/// Counts of one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
  /// Today's entries returned by the feeds
  pub fetched:             usize,
  /// New articles stored
  pub inserted:            usize,
  /// Entries already stored
  pub skipped_duplicate:   usize,
  /// Entries whose enrichment fell back or failed
  pub enrichment_degraded: usize,
  /// New articles with at least one confident field
  pub classified:          usize,
  /// New articles left without fields
  pub unclassified:        usize,
  /// Field rows written
  pub field_assignments:   usize,
  /// Logic graphs generated successfully
  pub graphs_generated:    usize,
  /// Logic graphs stored as failure sentinels
  pub graphs_failed:       usize,
  /// New articles without a usable abstract, so without a graph
  pub graphs_skipped:      usize,
  /// Entries abandoned because of a store error
  pub failed:              usize,
  /// New articles per journal
  pub per_journal:         BTreeMap<String, usize>,
}

impl fmt::Display for BatchReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "fetched:             {}", self.fetched)?;
    writeln!(f, "inserted:            {}", self.inserted)?;
    writeln!(f, "skipped (duplicate): {}", self.skipped_duplicate)?;
    writeln!(f, "enrichment degraded: {}", self.enrichment_degraded)?;
    writeln!(f, "classified:          {} ({} fields)", self.classified, self.field_assignments)?;
    writeln!(f, "unclassified:        {}", self.unclassified)?;
    writeln!(
      f,
      "logic graphs:        {} generated, {} failed, {} skipped",
      self.graphs_generated, self.graphs_failed, self.graphs_skipped
    )?;
    write!(f, "failed:              {}", self.failed)?;
    for (journal, count) in &self.per_journal {
      write!(f, "\n  {journal}: {count}")?;
    }
    Ok(())
  }
}

/// Counts of a backfill or reclassification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
  /// Articles looked at
  pub processed: usize,
  /// Articles that now have a graph or fields
  pub succeeded: usize,
  /// Articles that are still without one
  pub failed:    usize,
}

impl fmt::Display for MaintenanceReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "processed {}, succeeded {}, failed {}", self.processed, self.succeeded, self.failed)
  }
}

/// Why no logic graph can be returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphUnavailable {
  /// No article has this id.
  ArticleNotFound,
  /// The article's abstract is missing or a sentinel.
  AbstractUnusable,
}

impl fmt::Display for GraphUnavailable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphUnavailable::ArticleNotFound => write!(f, "article not found"),
      GraphUnavailable::AbstractUnusable => write!(f, "article has no usable abstract"),
    }
  }
}

/// Answer to an on-demand logic graph request.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphLookup {
  /// The stored graph, possibly holding the failure sentinels.
  Ready(LogicGraph),
  /// No graph can be produced for this article.
  Unavailable(GraphUnavailable),
}

/// The ingestion pipeline and its maintenance jobs.
pub struct Pipeline {
  /// Validated configuration.
  config:     Config,
  /// Article store.
  db:         Database,
  /// Journal feed client.
  feeds:      FeedReader,
  /// Enrichment stage.
  enricher:   Enricher,
  /// Classification stage.
  classifier: FieldClassifier,
  /// Logic graph stage.
  graphs:     LogicGraphGenerator,
}

impl Pipeline {
  /// Wires the stages together. Fails if the configuration is invalid.
  pub fn new(config: Config, db: Database, model: Arc<dyn LanguageModel>) -> Result<Self, PulseError> {
    config.validate()?;
    Ok(Self {
      feeds: FeedReader::new(config.ingest.feed_timeout_secs)?,
      enricher: Enricher::new(model.clone(), &config.llm.enrichment_model),
      classifier: FieldClassifier::new(
        model.clone(),
        config.taxonomy.clone(),
        &config.llm.classification_model,
      ),
      graphs: LogicGraphGenerator::new(model, &config.llm.reasoning_model),
      config,
      db,
    })
  }

  /// The configuration in use.
  pub fn config(&self) -> &Config { &self.config }

  /// The article store.
  pub fn database(&self) -> &Database { &self.db }

  /// Runs the batch for the local calendar date.
  pub async fn run_today(&self) -> BatchReport {
    let now = Local::now().naive_local();
    self.run_batch(now.date(), now).await
  }

  /// Fetches today's entries from every journal and ingests them.
  pub async fn run_batch(&self, today: NaiveDate, now: NaiveDateTime) -> BatchReport {
    info!(%today, journals = self.config.journals.len(), "Starting batch");
    let entries = self
      .feeds
      .fetch(&self.config.journals, self.config.ingest.per_journal_limit, today, now)
      .await;
    self.ingest(&entries).await
  }

  /// Ingests already fetched entries in order.
  pub async fn ingest(&self, entries: &[FeedEntry]) -> BatchReport {
    let mut report = BatchReport { fetched: entries.len(), ..BatchReport::default() };

    for (index, entry) in entries.iter().enumerate() {
      debug!(
        entry = index + 1,
        total = entries.len(),
        title = %format::preview(&entry.title, 60),
        "Processing entry"
      );
      if let Err(e) = self.ingest_entry(entry, &mut report).await {
        error!(link = %entry.link, title = %format::preview(&entry.title, 60), error = %e, "Failed to ingest entry");
        report.failed += 1;
      }
    }

    info!(
      fetched = report.fetched,
      inserted = report.inserted,
      skipped = report.skipped_duplicate,
      failed = report.failed,
      "Batch complete"
    );
    report
  }

  /// Takes one entry through every stage.
  async fn ingest_entry(&self, entry: &FeedEntry, report: &mut BatchReport) -> Result<(), PulseError> {
    if self.db.exists(&entry.dedup_key()).await? {
      debug!(link = %entry.link, "Already stored, skipping");
      report.skipped_duplicate += 1;
      return Ok(());
    }

    let enriched = self.enricher.enrich(entry).await;
    if !enriched.is_success() {
      report.enrichment_degraded += 1;
    }
    let article = enriched.into_value();

    let article_id = match self.db.insert_article(&article).await? {
      SaveOutcome::Inserted(id) => id,
      SaveOutcome::Duplicate => {
        debug!(link = %entry.link, "Duplicate at insert, skipping");
        report.skipped_duplicate += 1;
        return Ok(());
      },
    };
    report.inserted += 1;
    *report.per_journal.entry(article.journal.clone()).or_default() += 1;
    info!(id = article_id, journal = %article.journal, title = %format::preview(&article.translated_title, 40), "Stored article");

    let written = self.classify_and_store(article_id, &article.original_title, &article.abstract_text).await?;
    if written == 0 {
      report.unclassified += 1;
    } else {
      report.field_assignments += written;
      report.classified += 1;
    }

    if self.config.ingest.logic_graphs {
      if article.has_usable_abstract() {
        let outcome =
          self.generate_and_store(article_id, &article.translated_title, &article.abstract_text).await?;
        if outcome.is_success() {
          report.graphs_generated += 1;
        } else {
          report.graphs_failed += 1;
        }
      } else {
        debug!(id = article_id, "No usable abstract, skipping logic graph");
        report.graphs_skipped += 1;
      }
    }
    Ok(())
  }

  /// Classifies a stored article and upserts its confident fields; returns how many were written.
  async fn classify_and_store(
    &self,
    article_id: i64,
    title: &str,
    abstract_text: &str,
  ) -> Result<usize, PulseError> {
    let scores = self.classifier.classify(title, abstract_text).await.into_value();
    if scores.is_empty() {
      return Ok(0);
    }
    self.db.upsert_fields(article_id, &scores).await
  }

  /// Stores already enriched candidates and classifies each one that was inserted.
  ///
  /// Duplicates are skipped without any model call. Classification degrades like in
  /// [`Pipeline::ingest`]: a new article may be left without fields.
  pub async fn save(&self, candidates: &[NewArticle]) -> Result<SaveReport, PulseError> {
    let report = self.db.save_articles(candidates).await?;
    for (article_id, article) in &report.new_articles {
      self.classify_and_store(*article_id, &article.original_title, &article.abstract_text).await?;
    }
    Ok(report)
  }

  /// Generates a graph and stores whatever came out, sentinels included.
  async fn generate_and_store(
    &self,
    article_id: i64,
    title: &str,
    abstract_text: &str,
  ) -> Result<Outcome<GeneratedGraph>, PulseError> {
    let outcome = self.graphs.generate(title, abstract_text).await;
    self.db.upsert_logic_graph(article_id, outcome.value()).await?;
    Ok(outcome)
  }

  /// Returns the article's logic graph, generating it first when none is stored.
  pub async fn logic_graph_for(&self, article_id: i64) -> Result<GraphLookup, PulseError> {
    if let Some(graph) = self.db.logic_graph(article_id).await? {
      return Ok(GraphLookup::Ready(graph));
    }
    self.regenerate_logic_graph(article_id).await
  }

  /// Generates the article's logic graph anew, replacing a stored one in place.
  pub async fn regenerate_logic_graph(&self, article_id: i64) -> Result<GraphLookup, PulseError> {
    let Some(article) = self.db.article(article_id).await? else {
      return Ok(GraphLookup::Unavailable(GraphUnavailable::ArticleNotFound));
    };
    if !article.has_usable_abstract() {
      return Ok(GraphLookup::Unavailable(GraphUnavailable::AbstractUnusable));
    }

    self.generate_and_store(article_id, article.display_title(), &article.abstract_text).await?;
    let graph = self.db.logic_graph(article_id).await?.ok_or(PulseError::NotFound)?;
    Ok(GraphLookup::Ready(graph))
  }

  /// Generates graphs for up to `limit` of the newest articles that have none.
  pub async fn backfill_logic_graphs(&self, limit: usize) -> Result<MaintenanceReport, PulseError> {
    let articles = self.db.articles_missing_logic_graph(limit).await?;
    info!(count = articles.len(), "Backfilling logic graphs");

    let mut report = MaintenanceReport::default();
    for article in articles {
      report.processed += 1;
      match self.generate_and_store(article.id, article.display_title(), &article.abstract_text).await {
        Ok(outcome) if outcome.is_success() => report.succeeded += 1,
        Ok(_) => report.failed += 1,
        Err(e) => {
          error!(id = article.id, link = %article.link, error = %e, "Failed to store logic graph");
          report.failed += 1;
        },
      }
    }
    Ok(report)
  }

  /// Classifies up to `limit` of the newest articles that have no field rows.
  pub async fn reclassify_unclassified(&self, limit: usize) -> Result<MaintenanceReport, PulseError> {
    let articles = self.db.unclassified_articles(limit).await?;
    info!(count = articles.len(), "Reclassifying articles without fields");

    let mut report = MaintenanceReport::default();
    for article in articles {
      report.processed += 1;
      match self.classify_and_store(article.id, &article.original_title, &article.abstract_text).await {
        Ok(0) => report.failed += 1,
        Ok(_) => report.succeeded += 1,
        Err(e) => {
          error!(id = article.id, link = %article.link, error = %e, "Failed to store fields");
          report.failed += 1;
        },
      }
    }
    Ok(report)
  }

  /// Whether an article belongs to `field`, for digest selection.
  ///
  /// A stored article is judged by its stored confidence. Only an article the store does not
  /// know by `link` is sent to the single-field yes/no check, which answers `false` when the
  /// service is unavailable.
  pub async fn is_related_to_field(
    &self,
    link: &str,
    title: &str,
    abstract_text: &str,
    field: &str,
  ) -> Result<bool, PulseError> {
    let field = self.config.taxonomy.require(field)?;
    if let Some(article_id) = self.db.article_id_by_link(link).await? {
      let confidence = self.db.field_confidence(article_id, field).await?;
      return Ok(confidence.is_some_and(passes_threshold));
    }
    Ok(self.classifier.is_related(title, abstract_text, field).await?.into_value())
  }
}
