//! Feed reader for journal RSS and Atom feeds.
//!
//! Fetches every configured journal's feed, normalises entry dates, keeps the entries published
//! today (ingestion is a daily-freshness filter, not a backfill), truncates each journal to a
//! limit and tags every entry with the journal its link belongs to.
//!
//! Three feed dialects are understood, all deserialised with `quick-xml`. The deserialiser matches
//! elements by local name, so `dc:title` and `title` land in the same list and the first non-blank
//! value wins:
//! - RSS 2.0 (`rss/channel/item`), used by cell.com and thelancet.com
//! - RSS 1.0 / RDF (`RDF/item` with Dublin Core `dc:date` and `dc:creator`), used by nature.com
//! - Atom (`feed/entry`)
//!
//! A journal whose feed cannot be fetched or parsed contributes no entries; the others are
//! unaffected.
//!
//! # Examples
//!
//! ```no_run
//! use pulse::{clients::FeedReader, config::Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let reader = FeedReader::new(config.ingest.feed_timeout_secs)?;
//! let now = chrono::Local::now().naive_local();
//! let entries = reader.fetch(&config.journals, 3, now.date(), now).await;
//! for entry in entries {
//!   println!("[{}] {}", entry.journal, entry.title);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;

use super::*;
use crate::article::{LINK_PLACEHOLDER, UNTITLED};

lazy_static! {
  /// Trailing time-zone abbreviation such as ` CEST`, which chrono cannot parse.
  static ref TRAILING_ZONE: Regex = Regex::new(r"\s+[A-Za-z]{1,5}$").unwrap();
}

/// Naive formats tried after RFC 2822 and RFC 3339.
const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"];

/// Any of the supported feed documents. Only the parts that apply are present.
#[derive(Debug, Default, Deserialize)]
struct RawFeed {
  /// RSS 2.0 channel
  #[serde(default)]
  channel: Option<RawChannel>,
  /// RSS 1.0 items, which sit beside the channel
  #[serde(default, rename = "item")]
  items:   Vec<RawItem>,
  /// Atom entries
  #[serde(default, rename = "entry")]
  entries: Vec<RawAtomEntry>,
}

/// RSS channel; everything except the items is ignored.
#[derive(Debug, Default, Deserialize)]
struct RawChannel {
  /// RSS 2.0 items
  #[serde(default, rename = "item")]
  items: Vec<RawItem>,
}

/// An RSS 1.0 or 2.0 item.
///
/// Elements that may appear both plain and under a namespace (`title` and `dc:title`, `link` and
/// `atom:link`) are collected as lists.
#[derive(Debug, Default, Deserialize)]
struct RawItem {
  /// Item titles, plain and Dublin Core
  #[serde(default, rename = "title")]
  titles:   Vec<String>,
  /// Article links; an `atom:link` contributes an empty one
  #[serde(default, rename = "link")]
  links:    Vec<String>,
  /// RSS 2.0 publication date (RFC 2822)
  #[serde(default, rename = "pubDate")]
  pub_date: Vec<String>,
  /// Atom-style update date some RSS feeds borrow
  #[serde(default)]
  updated:  Vec<String>,
  /// Dublin Core date
  #[serde(default, rename = "date")]
  date:     Vec<String>,
  /// Dublin Core creators
  #[serde(default, rename = "creator")]
  creators: Vec<String>,
  /// RSS 2.0 authors
  #[serde(default, rename = "author")]
  authors:  Vec<String>,
}

/// An Atom entry.
#[derive(Debug, Default, Deserialize)]
struct RawAtomEntry {
  /// Entry titles, including namespaced ones such as `media:title`
  #[serde(default, rename = "title")]
  titles:    Vec<String>,
  /// Entry links; the alternate one is the article
  #[serde(default, rename = "link")]
  links:     Vec<RawAtomLink>,
  /// Entry id, often the article URL
  #[serde(default)]
  id:        Option<String>,
  /// First publication
  #[serde(default)]
  published: Option<String>,
  /// Last update
  #[serde(default)]
  updated:   Option<String>,
  /// Entry authors
  #[serde(default, rename = "author")]
  authors:   Vec<RawAtomAuthor>,
}

/// An Atom `<link href rel>` element.
#[derive(Debug, Default, Deserialize)]
struct RawAtomLink {
  /// Target URL
  #[serde(default, rename = "@href")]
  href: Option<String>,
  /// Relation, `alternate` when absent
  #[serde(default, rename = "@rel")]
  rel:  Option<String>,
}

/// An Atom `<author>` element.
#[derive(Debug, Default, Deserialize)]
struct RawAtomAuthor {
  /// Author name
  #[serde(default)]
  name: Option<String>,
}

/// A feed item with a normalised date, before journal tagging and the freshness filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
  /// Title, or [`UNTITLED`]
  pub title:     String,
  /// Link, or [`LINK_PLACEHOLDER`]
  pub link:      String,
  /// Authors in feed order
  pub authors:   Vec<String>,
  /// Publication time; `now` when no date could be parsed
  pub published: NaiveDateTime,
}

/// Parses one date string with the supported formats.
///
/// Zone names RFC 2822 defines (`GMT`, `EST`, `CST`, `PST`, ...) are honoured and converted to UTC.
/// Any other trailing abbreviation, e.g. `CEST`, is dropped and the wall-clock time kept.
fn parse_date(raw: &str) -> Option<NaiveDateTime> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
    return Some(dt.naive_utc());
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.naive_utc());
  }
  if let Some(zone) = TRAILING_ZONE.find(raw) {
    if let Ok(dt) = NaiveDateTime::parse_from_str(&raw[..zone.start()], "%a, %d %b %Y %H:%M:%S") {
      return Some(dt);
    }
  }
  for format in DATE_TIME_FORMATS {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(dt);
    }
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Resolves an entry's publication time from its date candidates, in priority order.
///
/// Never fails: when no candidate parses, the result is `now`.
///
/// ```
/// use chrono::NaiveDate;
/// use pulse::clients::feed::parse_entry_date;
///
/// let now = NaiveDate::from_ymd_opt(2024, 5, 14).unwrap().and_hms_opt(12, 0, 0).unwrap();
/// let parsed = parse_entry_date(&[Some("not a date"), Some("2024-05-13")], now);
/// assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
/// assert_eq!(parse_entry_date(&[None], now), now);
/// ```
pub fn parse_entry_date(candidates: &[Option<&str>], now: NaiveDateTime) -> NaiveDateTime {
  candidates.iter().flatten().find_map(|raw| parse_date(raw)).unwrap_or(now)
}

/// Trims a text value, treating blank as absent.
fn non_blank(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// The first non-blank value of a repeated element.
fn first_non_blank(values: &[String]) -> Option<&str> {
  values.iter().map(|v| v.trim()).find(|v| !v.is_empty())
}

/// Parses a feed document into items, oldest-first order preserved as in the document.
pub fn parse_feed(xml: &str, now: NaiveDateTime) -> Result<Vec<ParsedItem>, PulseError> {
  let feed: RawFeed =
    from_str(xml).map_err(|e| PulseError::InvalidFeed(format!("failed to parse XML: {e}")))?;

  let rss_items = feed.channel.map(|c| c.items).unwrap_or_default().into_iter().chain(feed.items);
  let mut parsed: Vec<ParsedItem> = rss_items
    .map(|item| {
      let published = parse_entry_date(
        &[first_non_blank(&item.pub_date), first_non_blank(&item.updated), first_non_blank(&item.date)],
        now,
      );
      let authors = item
        .creators
        .into_iter()
        .chain(item.authors)
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
      ParsedItem {
        title: first_non_blank(&item.titles).unwrap_or(UNTITLED).to_string(),
        link: first_non_blank(&item.links).unwrap_or(LINK_PLACEHOLDER).to_string(),
        authors,
        published,
      }
    })
    .collect();

  parsed.extend(feed.entries.into_iter().map(|entry| {
    let published =
      parse_entry_date(&[entry.published.as_deref(), entry.updated.as_deref()], now);
    let link = entry
      .links
      .iter()
      .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
      .or_else(|| entry.links.first())
      .and_then(|l| l.href.clone())
      .or_else(|| entry.id.clone().filter(|id| id.starts_with("http")));
    ParsedItem {
      title: first_non_blank(&entry.titles).unwrap_or(UNTITLED).to_string(),
      link: non_blank(link).unwrap_or_else(|| LINK_PLACEHOLDER.to_string()),
      authors: entry.authors.into_iter().filter_map(|a| non_blank(a.name)).collect(),
      published,
    }
  }));

  Ok(parsed)
}

/// Keeps the items published on `today`, at most `limit` of them in feed order, and tags each
/// with the journal its link belongs to.
pub fn select_entries(
  items: Vec<ParsedItem>,
  journals: &[JournalConfig],
  today: NaiveDate,
  limit: usize,
) -> Vec<FeedEntry> {
  items
    .into_iter()
    .filter(|item| item.published.date() == today)
    .take(limit)
    .map(|item| FeedEntry {
      journal:   config::identify_journal(journals, &item.link).to_string(),
      title:     item.title,
      authors:   item.authors,
      link:      item.link,
      published: item.published,
    })
    .collect()
}

/// Client that downloads journal feeds.
pub struct FeedReader {
  /// Internal web client used to download feeds.
  client: reqwest::Client,
}

impl FeedReader {
  /// Creates a reader whose downloads time out after `timeout_secs`.
  pub fn new(timeout_secs: u64) -> Result<Self, PulseError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }

  /// Downloads and parses one journal's feed.
  pub async fn fetch_feed(
    &self,
    journal: &JournalConfig,
    now: NaiveDateTime,
  ) -> Result<Vec<ParsedItem>, PulseError> {
    debug!(journal = %journal.name, url = %journal.feed_url, "Fetching feed");
    let response = self.client.get(&journal.feed_url).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(PulseError::ApiError(format!("{status} from {}", journal.feed_url)));
    }
    let body = response.text().await?;
    trace!(journal = %journal.name, bytes = body.len(), "Feed downloaded");
    parse_feed(&body, now)
  }

  /// Fetches every journal in order and returns today's entries, at most
  /// `per_journal_limit` per journal.
  ///
  /// Failures are logged per journal and never abort the remaining journals.
  pub async fn fetch(
    &self,
    journals: &[JournalConfig],
    per_journal_limit: usize,
    today: NaiveDate,
    now: NaiveDateTime,
  ) -> Vec<FeedEntry> {
    let mut all_entries = Vec::new();
    for journal in journals {
      match self.fetch_feed(journal, now).await {
        Ok(items) => {
          let total = items.len();
          let entries = select_entries(items, journals, today, per_journal_limit);
          info!(journal = %journal.name, total, today = entries.len(), "Feed fetched");
          all_entries.extend(entries);
        },
        Err(e) => {
          warn!(journal = %journal.name, error = %e, "Skipping journal, feed unavailable");
        },
      }
    }
    all_entries
  }
}

#[cfg(test)]
mod tests {
  use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
  };

  use super::*;
  use crate::article::UNKNOWN_JOURNAL;

  fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 14).unwrap().and_hms_opt(12, 0, 0).unwrap()
  }

  fn today() -> NaiveDate { now().date() }

  fn cell() -> JournalConfig {
    JournalConfig {
      name:             "Cell".to_string(),
      feed_url:         "https://www.cell.com/cell/current.rss".to_string(),
      domain_patterns:  vec!["cell.com".to_string()],
      exclude_patterns: vec![],
    }
  }

  const RSS2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Cell: Current issue</title>
    <link>https://www.cell.com/cell</link>
    <atom:link href="https://www.cell.com/cell/current.rss" rel="self" type="application/rss+xml"/>
    <item>
      <title><![CDATA[Single-cell atlas of the human liver]]></title>
      <link>https://www.cell.com/cell/fulltext/S0092-0001</link>
      <dc:creator>Ada Lovelace</dc:creator>
      <dc:creator>Alan Turing</dc:creator>
      <pubDate>Tue, 14 May 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Yesterday's news</title>
      <link>https://www.cell.com/cell/fulltext/S0092-0002</link>
      <pubDate>Mon, 13 May 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Gut microbiome and memory</title>
      <link>https://www.cell.com/cell/fulltext/S0092-0003</link>
      <pubDate>Tue, 14 May 2024 09:30:00 +0000</pubDate>
    </item>
    <item>
      <title>Older still</title>
      <link>https://www.cell.com/cell/fulltext/S0092-0004</link>
      <pubDate>2024-05-13 10:00:00</pubDate>
    </item>
    <item>
      <title>Protein folding in vivo</title>
      <link>https://www.cell.com/cell/fulltext/S0092-0005</link>
      <pubDate>2024-05-14</pubDate>
    </item>
  </channel>
</rss>"#;

  const RDF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/">
  <channel rdf:about="https://www.nature.com/nature.rss">
    <title>Nature</title>
    <link>https://www.nature.com/nature</link>
  </channel>
  <item rdf:about="https://www.nature.com/articles/s41586-024-00001-1">
    <title>A room-temperature quantum memory</title>
    <dc:title>A room-temperature quantum memory</dc:title>
    <link>https://www.nature.com/articles/s41586-024-00001-1</link>
    <dc:creator>Grace Hopper</dc:creator>
    <dc:creator>Katherine Johnson</dc:creator>
    <dc:date>2024-05-14T09:00:00Z</dc:date>
    <prism:doi>10.1038/s41586-024-00001-1</prism:doi>
  </item>
  <item rdf:about="">
    <title></title>
    <dc:date>2024-05-14</dc:date>
  </item>
</rdf:RDF>"#;

  const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example journal</title>
  <entry>
    <title type="html">Carbon capture with MOFs</title>
    <link rel="self" href="https://example.org/api/1"/>
    <link rel="alternate" href="https://example.org/articles/1"/>
    <id>urn:example:1</id>
    <published>2024-05-14T06:00:00+02:00</published>
    <author><name>Marie Curie</name></author>
  </entry>
  <entry>
    <title>No links here</title>
    <id>https://example.org/articles/2</id>
    <updated>2024-05-14T11:00:00Z</updated>
  </entry>
</feed>"#;

  #[test]
  fn test_parse_rss2() {
    let items = parse_feed(RSS2, now()).unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[0].title, "Single-cell atlas of the human liver");
    assert_eq!(items[0].authors, vec!["Ada Lovelace", "Alan Turing"]);
    assert_eq!(items[0].published.date(), today());
    assert_eq!(items[3].published.date(), NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
  }

  #[test]
  fn test_parse_rdf_with_missing_fields() {
    let items = parse_feed(RDF, now()).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].link, "https://www.nature.com/articles/s41586-024-00001-1");
    assert_eq!(items[0].title, "A room-temperature quantum memory");
    assert_eq!(items[0].authors, vec!["Grace Hopper", "Katherine Johnson"]);
    assert_eq!(items[0].published, today().and_hms_opt(9, 0, 0).unwrap());
    assert_eq!(items[1].title, UNTITLED);
    assert_eq!(items[1].link, LINK_PLACEHOLDER);
  }

  #[test]
  fn test_parse_atom() {
    let items = parse_feed(ATOM, now()).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].link, "https://example.org/articles/1");
    assert_eq!(items[0].authors, vec!["Marie Curie"]);
    // 06:00 at +02:00 is 04:00 UTC on the same day.
    assert_eq!(items[0].published.date(), today());
    assert_eq!(items[1].link, "https://example.org/articles/2");
  }

  #[test]
  fn test_parse_rss2_item_with_namespaced_duplicates() {
    let xml = r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <item>
      <title>  </title>
      <dc:title>Lancet title</dc:title>
      <atom:link href="https://www.thelancet.com/feed" rel="self"/>
      <link>https://www.thelancet.com/journals/lancet/article/PIIS0140-0001</link>
      <dc:creator>Florence Nightingale</dc:creator>
      <author>John Snow</author>
      <dc:date>2024-05-13</dc:date>
    </item>
  </channel>
</rss>"#;
    let items = parse_feed(xml, now()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Lancet title");
    assert_eq!(items[0].link, "https://www.thelancet.com/journals/lancet/article/PIIS0140-0001");
    assert_eq!(items[0].authors, vec!["Florence Nightingale", "John Snow"]);
    assert_eq!(items[0].published.date(), NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
  }

  #[test]
  fn test_invalid_feed_is_an_error() {
    assert!(matches!(parse_feed("<rss><channel>", now()), Err(PulseError::InvalidFeed(_))));
  }

  #[test]
  fn test_date_fallback_chain() {
    let at = |y, m, d, h, min| NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap();

    assert_eq!(parse_entry_date(&[Some("Tue, 14 May 2024 08:00:00 GMT")], now()), at(2024, 5, 14, 8, 0));
    // CST is a North American zone in RFC 2822: 08:00 CST is 14:00 UTC.
    assert_eq!(parse_entry_date(&[Some("Tue, 14 May 2024 08:00:00 CST")], now()), at(2024, 5, 14, 14, 0));
    assert_eq!(parse_entry_date(&[Some("Tue, 14 May 2024 08:00:00 CEST")], now()), at(2024, 5, 14, 8, 0));
    assert_eq!(parse_entry_date(&[Some("2024-05-14T08:00:00Z")], now()), at(2024, 5, 14, 8, 0));
    assert_eq!(parse_entry_date(&[Some("2024-05-14 08:00:00")], now()), at(2024, 5, 14, 8, 0));
    assert_eq!(parse_entry_date(&[Some("2024-05-14")], now()), at(2024, 5, 14, 0, 0));
    assert_eq!(parse_entry_date(&[Some("last Tuesday")], now()), now());
    assert_eq!(parse_entry_date(&[None, Some("")], now()), now());
    assert_eq!(
      parse_entry_date(&[Some("garbage"), Some("2024-05-01")], now()),
      at(2024, 5, 1, 0, 0)
    );
  }

  #[test]
  fn test_select_keeps_todays_entries_up_to_limit() {
    let items = parse_feed(RSS2, now()).unwrap();
    let entries = select_entries(items, &[cell()], today(), 3);
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.published.date() == today()));
    assert_eq!(entries[0].title, "Single-cell atlas of the human liver");
    assert_eq!(entries[1].title, "Gut microbiome and memory");
    assert_eq!(entries[2].title, "Protein folding in vivo");
    assert!(entries.iter().all(|e| e.journal == "Cell"));

    let items = parse_feed(RSS2, now()).unwrap();
    let entries = select_entries(items, &[cell()], today(), 2);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].title, "Gut microbiome and memory");
  }

  #[test]
  fn test_select_tags_unknown_journal() {
    let items = parse_feed(ATOM, now()).unwrap();
    let entries = select_entries(items, &[cell()], today(), 10);
    assert!(entries.iter().all(|e| e.journal == UNKNOWN_JOURNAL));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_fetch_survives_failing_journal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/broken.rss"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/garbled.rss"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a feed"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/cell.rss"))
      .respond_with(ResponseTemplate::new(200).set_body_string(RSS2))
      .mount(&server)
      .await;

    let journal = |name: &str, file: &str| JournalConfig {
      name:             name.to_string(),
      feed_url:         format!("{}/{file}", server.uri()),
      domain_patterns:  vec![format!("{name}.invalid")],
      exclude_patterns: vec![],
    };
    let mut mirror = cell();
    mirror.feed_url = format!("{}/cell.rss", server.uri());
    let journals = vec![journal("Broken", "broken.rss"), journal("Garbled", "garbled.rss"), mirror];

    let reader = FeedReader::new(5)?;
    let entries = reader.fetch(&journals, 3, today(), now()).await;

    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.journal == "Cell"));
    assert!(logs_contain("Skipping journal"));
    Ok(())
  }
}
