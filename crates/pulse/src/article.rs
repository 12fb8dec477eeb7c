//! Records flowing through the pipeline and the sentinel values they may carry.
//!
//! A [`FeedEntry`] is what the feed reader produces, a [`NewArticle`] is an enriched candidate
//! handed to the store, and [`Article`], [`FieldAssignment`] and [`LogicGraph`] are the rows the
//! store owns.
//!
//! Stages never signal "no data" with an empty string. They use the sentinel constants below,
//! which downstream stages recognise through [`is_usable_abstract`] and [`is_placeholder_link`].

use super::*;

/// Link stored for entries that carried no link.
pub const LINK_PLACEHOLDER: &str = "无链接";
/// Journal name for links that match no configured journal.
pub const UNKNOWN_JOURNAL: &str = "未知期刊";
/// Title stored for entries that carried no title.
pub const UNTITLED: &str = "无标题";
/// Abstract when the model's answer had no abstract, or the model was unreachable.
pub const ABSTRACT_UNAVAILABLE: &str = "摘要获取失败";
/// Abstract and summary when the model's answer could not be parsed.
pub const PROCESSING_FAILED: &str = "内容处理异常";
/// Summary when the model's answer had no summary.
pub const SUMMARY_UNAVAILABLE: &str = "总结生成失败";
/// Summary when the model was unreachable.
pub const SERVICE_UNAVAILABLE: &str = "服务暂时不可用";
/// Separator used to serialise ordered author lists into a single column.
pub const AUTHOR_SEPARATOR: &str = ", ";

/// Whether `link` is missing or the placeholder, i.e. unusable as a dedup key.
pub fn is_placeholder_link(link: &str) -> bool {
  let link = link.trim();
  link.is_empty() || link == LINK_PLACEHOLDER
}

/// Whether `text` is a real abstract rather than empty or one of the abstract sentinels.
///
/// ```
/// use pulse::article::{is_usable_abstract, PROCESSING_FAILED};
///
/// assert!(is_usable_abstract("We report a room-temperature superconductor."));
/// assert!(!is_usable_abstract(PROCESSING_FAILED));
/// assert!(!is_usable_abstract("  "));
/// ```
pub fn is_usable_abstract(text: &str) -> bool {
  let text = text.trim();
  !text.is_empty() && text != ABSTRACT_UNAVAILABLE && text != PROCESSING_FAILED
}

/// One raw feed item after date normalisation and journal tagging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
  /// Display name of the journal the link was matched to, or [`UNKNOWN_JOURNAL`]
  pub journal:   String,
  /// Title as published in the feed
  pub title:     String,
  /// Authors in feed order
  pub authors:   Vec<String>,
  /// Canonical link, or [`LINK_PLACEHOLDER`]
  pub link:      String,
  /// Publication time, normalised to a naive timestamp
  pub published: NaiveDateTime,
}

impl FeedEntry {
  /// Authors joined with [`AUTHOR_SEPARATOR`].
  pub fn authors_joined(&self) -> String { self.authors.join(AUTHOR_SEPARATOR) }

  /// The key the store uses to decide whether this entry was already ingested.
  pub fn dedup_key(&self) -> DedupKey { DedupKey::new(&self.link, &self.journal, &self.title) }
}

/// Two-tier dedup key: the link when there is one, otherwise `(journal, original_title)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
  /// Link, absent when the entry only had a placeholder
  pub link:           Option<String>,
  /// Journal display name
  pub journal:        String,
  /// Untranslated title
  pub original_title: String,
}

impl DedupKey {
  /// Builds a key, dropping placeholder links.
  pub fn new(link: &str, journal: &str, original_title: &str) -> Self {
    Self {
      link:           (!is_placeholder_link(link)).then(|| link.trim().to_string()),
      journal:        journal.to_string(),
      original_title: original_title.to_string(),
    }
  }
}

/// An enriched candidate article, ready to be offered to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
  /// Journal display name
  pub journal:            String,
  /// Title as published
  pub original_title:     String,
  /// Authors as published, joined with [`AUTHOR_SEPARATOR`]
  pub original_authors:   String,
  /// Canonical link, or [`LINK_PLACEHOLDER`]
  pub link:               String,
  /// Calendar date of publication
  pub publish_date:       NaiveDate,
  /// Translated title, or the original title when translation failed
  pub translated_title:   String,
  /// Translated authors, or the original authors when translation failed
  pub translated_authors: String,
  /// Abstract, or one of the abstract sentinels
  pub abstract_text:      String,
  /// Short summary, or one of the summary sentinels
  pub summary:            String,
}

impl NewArticle {
  /// Builds a candidate from the entry's base fields with translations left as the originals.
  ///
  /// These base fields never depend on the model.
  pub fn untranslated(entry: &FeedEntry, abstract_text: &str, summary: &str) -> Self {
    Self {
      journal:            entry.journal.clone(),
      original_title:     entry.title.clone(),
      original_authors:   entry.authors_joined(),
      link:               entry.link.clone(),
      publish_date:       entry.published.date(),
      translated_title:   entry.title.clone(),
      translated_authors: entry.authors_joined(),
      abstract_text:      abstract_text.to_string(),
      summary:            summary.to_string(),
    }
  }

  /// See [`FeedEntry::dedup_key`].
  pub fn dedup_key(&self) -> DedupKey {
    DedupKey::new(&self.link, &self.journal, &self.original_title)
  }

  /// Whether the abstract can feed the classifier and the logic-graph generator.
  pub fn has_usable_abstract(&self) -> bool { is_usable_abstract(&self.abstract_text) }
}

/// A stored article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
  /// Surrogate key assigned at insert
  pub id:                 i64,
  /// Journal display name
  pub journal:            String,
  /// Title as published
  pub original_title:     String,
  /// Translated title
  pub translated_title:   String,
  /// Authors as published, joined with [`AUTHOR_SEPARATOR`]
  pub original_authors:   String,
  /// Translated authors
  pub translated_authors: String,
  /// Abstract, or one of the abstract sentinels
  pub abstract_text:      String,
  /// Short summary
  pub summary:            String,
  /// Canonical link, or [`LINK_PLACEHOLDER`]
  pub link:               String,
  /// Calendar date of publication
  pub publish_date:       NaiveDate,
  /// When the row was inserted (UTC)
  pub created_at:         NaiveDateTime,
}

impl Article {
  /// The translated title when there is one, the original otherwise.
  pub fn display_title(&self) -> &str {
    if self.translated_title.trim().is_empty() {
      &self.original_title
    } else {
      &self.translated_title
    }
  }

  /// The original authors as an ordered list.
  pub fn author_list(&self) -> Vec<&str> {
    self.original_authors.split(AUTHOR_SEPARATOR).filter(|a| !a.trim().is_empty()).collect()
  }

  /// See [`is_usable_abstract`].
  pub fn has_usable_abstract(&self) -> bool { is_usable_abstract(&self.abstract_text) }
}

/// A research field assigned to an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssignment {
  /// Article the field belongs to
  pub article_id: i64,
  /// Field name from the taxonomy
  pub field:      String,
  /// Confidence in (0.5, 1.0]
  pub confidence: f64,
}

/// A stored logic graph, at most one per article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicGraph {
  /// Article the graph belongs to
  pub article_id:   i64,
  /// Mermaid source without code fences
  pub diagram:      String,
  /// Full reasoning trace of the model
  pub reasoning:    String,
  /// Self-verification excerpt taken from the trace
  pub verification: String,
  /// First generation (UTC)
  pub created_at:   NaiveDateTime,
  /// Last regeneration (UTC)
  pub updated_at:   NaiveDateTime,
}
