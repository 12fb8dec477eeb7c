//! SQLite store for articles, their research fields and their logic graphs.
//!
//! The store owns every invariant of the persisted data:
//! - an article is inserted at most once, keyed first on its link and then on
//!   `(journal, original_title)`; both keys are also enforced by unique indexes,
//! - an article is written whole or not at all,
//! - each `(article, field)` pair exists at most once and always carries a confidence in
//!   `(0.5, 1.0]`,
//! - each article has at most one logic graph.
//!
//! Duplicates are a normal result ([`SaveOutcome::Duplicate`]), never an error.
//!
//! The schema lives in `migrations/init.sql` and is applied on every [`Database::open`].

use std::path::Path;

use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::*;
use crate::{article::DedupKey, classify::FieldScores, graph::GeneratedGraph};

/// Columns read by [`article_from_row`], in order.
const ARTICLE_COLUMNS: &str = "a.id, a.journal, a.original_title, a.translated_title, \
                               a.original_authors, a.translated_authors, a.abstract, a.summary, \
                               a.link, a.publish_date, a.created_at";

/// Maps a row selected with [`ARTICLE_COLUMNS`].
fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
  Ok(Article {
    id:                 row.get(0)?,
    journal:            row.get(1)?,
    original_title:     row.get(2)?,
    translated_title:   row.get(3)?,
    original_authors:   row.get(4)?,
    translated_authors: row.get(5)?,
    abstract_text:      row.get(6)?,
    summary:            row.get(7)?,
    link:               row.get(8)?,
    publish_date:       row.get(9)?,
    created_at:         row.get(10)?,
  })
}

/// Whether an article with this key is already stored.
fn is_known(conn: &rusqlite::Connection, key: &DedupKey) -> rusqlite::Result<bool> {
  if let Some(link) = &key.link {
    if conn.prepare_cached("SELECT 1 FROM articles WHERE link = ?1")?.exists([link])? {
      return Ok(true);
    }
  }
  conn
    .prepare_cached("SELECT 1 FROM articles WHERE journal = ?1 AND original_title = ?2")?
    .exists(params![key.journal, key.original_title])
}

/// Result of offering one article to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
  /// The article was new and got this id.
  Inserted(i64),
  /// An article with the same dedup key already exists; nothing was written.
  Duplicate,
}

/// Result of [`Database::save_articles`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
  /// Number of new rows
  pub inserted:     usize,
  /// Number of candidates rejected as duplicates
  pub skipped:      usize,
  /// The new rows with their ids, in input order
  pub new_articles: Vec<(i64, NewArticle)>,
}

/// Handle to the article store.
#[derive(Clone)]
pub struct Database {
  /// Async connection; every statement runs on its dedicated thread.
  conn: Connection,
}

impl Database {
  /// Opens or creates a database at `path` and applies the schema.
  ///
  /// Missing parent directories are created.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, PulseError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).await?;

    conn
      .call(|conn| {
        conn.execute_batch(include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/init.sql")))?;
        Ok(())
      })
      .await?;

    debug!("Opened article store at {}", path.display());
    Ok(Self { conn })
  }

  /// Default database location in the user's data directory.
  pub fn default_path() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("pulse").join("pulse.db")
  }

  /// Whether an article with this dedup key is already stored.
  ///
  /// The batch checks this before spending any model call on an entry.
  pub async fn exists(&self, key: &DedupKey) -> Result<bool, PulseError> {
    let key = key.clone();
    self.conn.call(move |conn| Ok(is_known(conn, &key)?)).await.map_err(PulseError::from)
  }

  /// Inserts one article unless it duplicates a stored one.
  ///
  /// The dedup lookups and the insert share one transaction. A uniqueness violation at insert
  /// time is reported as [`SaveOutcome::Duplicate`] as well.
  pub async fn insert_article(&self, article: &NewArticle) -> Result<SaveOutcome, PulseError> {
    let article = article.clone();
    let key = article.dedup_key();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if is_known(&tx, &key)? {
          return Ok(SaveOutcome::Duplicate);
        }

        let inserted = {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO articles (
               journal, original_title, translated_title, original_authors,
               translated_authors, abstract, summary, link, publish_date
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING id",
          )?;
          stmt.query_row(
            params![
              &article.journal,
              &article.original_title,
              &article.translated_title,
              &article.original_authors,
              &article.translated_authors,
              &article.abstract_text,
              &article.summary,
              &article.link,
              &article.publish_date,
            ],
            |row| row.get::<_, i64>(0),
          )
        };

        match inserted {
          Ok(id) => {
            tx.commit()?;
            Ok(SaveOutcome::Inserted(id))
          },
          Err(rusqlite::Error::SqliteFailure(error, _))
            if error.code == rusqlite::ErrorCode::ConstraintViolation =>
            Ok(SaveOutcome::Duplicate),
          Err(e) => Err(e.into()),
        }
      })
      .await
      .map_err(PulseError::from)
  }

  /// Offers every candidate to the store in order.
  ///
  /// Insert only: nothing is classified here. [`crate::pipeline::Pipeline::save`] stores and
  /// classifies in one pass.
  pub async fn save_articles(&self, candidates: &[NewArticle]) -> Result<SaveReport, PulseError> {
    let mut report = SaveReport::default();
    for candidate in candidates {
      match self.insert_article(candidate).await? {
        SaveOutcome::Inserted(id) => {
          report.inserted += 1;
          report.new_articles.push((id, candidate.clone()));
        },
        SaveOutcome::Duplicate => {
          debug!(link = %candidate.link, "Skipping duplicate article");
          report.skipped += 1;
        },
      }
    }
    info!(inserted = report.inserted, skipped = report.skipped, "Saved articles");
    Ok(report)
  }

  /// Writes the field scores of an article, replacing the confidence of fields it already has.
  ///
  /// Returns the number of fields written.
  pub async fn upsert_fields(&self, article_id: i64, scores: &FieldScores) -> Result<usize, PulseError> {
    let scores: Vec<(String, f64)> = scores.iter().map(|(f, c)| (f.to_string(), c)).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO article_fields (article_id, field, confidence)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (article_id, field) DO UPDATE SET confidence = excluded.confidence",
          )?;
          for (field, confidence) in &scores {
            stmt.execute(params![article_id, field, confidence])?;
          }
        }
        tx.commit()?;
        Ok(scores.len())
      })
      .await
      .map_err(PulseError::from)
  }

  /// Fields of an article, most confident first.
  pub async fn fields_for(&self, article_id: i64) -> Result<Vec<FieldAssignment>, PulseError> {
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT article_id, field, confidence FROM article_fields
           WHERE article_id = ?1
           ORDER BY confidence DESC, field",
        )?;
        let fields = stmt.query_map([article_id], |row| {
          Ok(FieldAssignment { article_id: row.get(0)?, field: row.get(1)?, confidence: row.get(2)? })
        })?;
        Ok(fields.collect::<Result<Vec<_>, _>>()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Stored confidence of one `(article, field)` pair.
  pub async fn field_confidence(&self, article_id: i64, field: &str) -> Result<Option<f64>, PulseError> {
    let field = field.to_string();
    self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .prepare_cached(
              "SELECT confidence FROM article_fields WHERE article_id = ?1 AND field = ?2",
            )?
            .query_row(params![article_id, field], |row| row.get(0))
            .optional()?,
        )
      })
      .await
      .map_err(PulseError::from)
  }

  /// One article by id.
  pub async fn article(&self, article_id: i64) -> Result<Option<Article>, PulseError> {
    self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = ?1");
        Ok(conn.prepare_cached(&sql)?.query_row([article_id], article_from_row).optional()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Id of the article stored under `link`, if any. Placeholder links never match.
  pub async fn article_id_by_link(&self, link: &str) -> Result<Option<i64>, PulseError> {
    if article::is_placeholder_link(link) {
      return Ok(None);
    }
    let link = link.trim().to_string();
    self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .prepare_cached("SELECT id FROM articles WHERE link = ?1")?
            .query_row([link], |row| row.get(0))
            .optional()?,
        )
      })
      .await
      .map_err(PulseError::from)
  }

  /// Articles published within the last `days` days before `today`, newest first, optionally
  /// only those assigned to `field`.
  pub async fn recent_articles(
    &self,
    days: u32,
    field: Option<&str>,
    today: NaiveDate,
  ) -> Result<Vec<Article>, PulseError> {
    let since = today.checked_sub_signed(chrono::Duration::days(i64::from(days))).unwrap_or(NaiveDate::MIN);
    let field = field.map(str::to_string);

    self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {ARTICLE_COLUMNS} FROM articles a
           WHERE a.publish_date >= ?1
             AND (?2 IS NULL OR EXISTS (
               SELECT 1 FROM article_fields f WHERE f.article_id = a.id AND f.field = ?2))
           ORDER BY a.publish_date DESC, a.id DESC"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let articles = stmt.query_map(params![since, field], article_from_row)?;
        Ok(articles.collect::<Result<Vec<_>, _>>()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Every field that has at least one article, alphabetically.
  pub async fn distinct_fields(&self) -> Result<Vec<String>, PulseError> {
    self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached("SELECT DISTINCT field FROM article_fields ORDER BY field")?;
        let fields = stmt.query_map([], |row| row.get(0))?;
        Ok(fields.collect::<Result<Vec<_>, _>>()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// The logic graph of an article, if one was generated.
  pub async fn logic_graph(&self, article_id: i64) -> Result<Option<LogicGraph>, PulseError> {
    self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .prepare_cached(
              "SELECT article_id, diagram, reasoning, verification, created_at, updated_at
               FROM article_logic_graphs WHERE article_id = ?1",
            )?
            .query_row([article_id], |row| {
              Ok(LogicGraph {
                article_id:   row.get(0)?,
                diagram:      row.get(1)?,
                reasoning:    row.get(2)?,
                verification: row.get(3)?,
                created_at:   row.get(4)?,
                updated_at:   row.get(5)?,
              })
            })
            .optional()?,
        )
      })
      .await
      .map_err(PulseError::from)
  }

  /// Whether an article already has a logic graph.
  pub async fn has_logic_graph(&self, article_id: i64) -> Result<bool, PulseError> {
    self
      .conn
      .call(move |conn| {
        Ok(conn.prepare_cached("SELECT 1 FROM article_logic_graphs WHERE article_id = ?1")?.exists([article_id])?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Stores a logic graph, replacing the article's previous one in place.
  pub async fn upsert_logic_graph(&self, article_id: i64, graph: &GeneratedGraph) -> Result<(), PulseError> {
    let graph = graph.clone();
    self
      .conn
      .call(move |conn| {
        conn.prepare_cached(
          "INSERT INTO article_logic_graphs (article_id, diagram, reasoning, verification)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (article_id) DO UPDATE SET
             diagram = excluded.diagram,
             reasoning = excluded.reasoning,
             verification = excluded.verification,
             updated_at = CURRENT_TIMESTAMP",
        )?
        .execute(params![article_id, graph.diagram, graph.reasoning, graph.verification])?;
        Ok(())
      })
      .await
      .map_err(PulseError::from)
  }

  /// Articles without any field row, newest first.
  ///
  /// These are left behind when classification failed, or when the process stopped between
  /// insert and classification.
  pub async fn unclassified_articles(&self, limit: usize) -> Result<Vec<Article>, PulseError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {ARTICLE_COLUMNS} FROM articles a
           WHERE NOT EXISTS (SELECT 1 FROM article_fields f WHERE f.article_id = a.id)
           ORDER BY a.id DESC
           LIMIT ?1"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let articles = stmt.query_map([limit], article_from_row)?;
        Ok(articles.collect::<Result<Vec<_>, _>>()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Articles with a usable abstract but no logic graph, newest first.
  pub async fn articles_missing_logic_graph(&self, limit: usize) -> Result<Vec<Article>, PulseError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {ARTICLE_COLUMNS} FROM articles a
           LEFT JOIN article_logic_graphs g ON g.article_id = a.id
           WHERE g.id IS NULL
             AND TRIM(a.abstract) NOT IN ('', ?1, ?2)
           ORDER BY a.publish_date DESC, a.id DESC
           LIMIT ?3"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let articles = stmt.query_map(
          params![article::ABSTRACT_UNAVAILABLE, article::PROCESSING_FAILED, limit],
          article_from_row,
        )?;
        Ok(articles.collect::<Result<Vec<_>, _>>()?)
      })
      .await
      .map_err(PulseError::from)
  }

  /// Number of stored articles.
  pub async fn count_articles(&self) -> Result<usize, PulseError> {
    self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get::<_, i64>(0))?))
      .await
      .map(|count| count as usize)
      .map_err(PulseError::from)
  }

  /// Number of stored logic graphs.
  pub async fn count_logic_graphs(&self) -> Result<usize, PulseError> {
    self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM article_logic_graphs", [], |row| row.get::<_, i64>(0))?)
      })
      .await
      .map(|count| count as usize)
      .map_err(PulseError::from)
  }
}
