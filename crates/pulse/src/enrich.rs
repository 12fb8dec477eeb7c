//! Enrichment of feed entries with a translated title, translated authors, an abstract and a
//! short summary.
//!
//! The base fields of the resulting [`NewArticle`] (journal, original title, authors, link and
//! publication date) always come straight from the [`FeedEntry`]. Only the enriched fields depend
//! on the model, and every way the model can misbehave maps to a value the later stages
//! recognise:
//!
//! | model behaviour      | outcome              | abstract                   | summary                   |
//! |----------------------|----------------------|----------------------------|---------------------------|
//! | valid JSON object    | [`Outcome::Success`]  | model text or [`ABSTRACT_UNAVAILABLE`] | model text or [`SUMMARY_UNAVAILABLE`] |
//! | unparsable answer    | [`Outcome::Fallback`] | [`PROCESSING_FAILED`]      | [`PROCESSING_FAILED`]     |
//! | unreachable service  | [`Outcome::Failed`]   | [`ABSTRACT_UNAVAILABLE`]   | [`SERVICE_UNAVAILABLE`]   |
//!
//! Translated fields fall back to the originals in every degraded case.

use serde_json::Value;

use super::*;
use crate::{
  article::{
    ABSTRACT_UNAVAILABLE, AUTHOR_SEPARATOR, PROCESSING_FAILED, SERVICE_UNAVAILABLE,
    SUMMARY_UNAVAILABLE,
  },
  clients::ChatRequest,
  format,
};

/// Upper bound on the abstract length requested from the model.
pub const ABSTRACT_MAX_CHARS: usize = 250;
/// Upper bound on the summary length requested from the model.
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Sampling temperature for enrichment requests.
const TEMPERATURE: f32 = 0.3;

/// Builds the instruction sent with every enrichment request.
fn system_prompt() -> String {
  format!(
    "你是一名学术编辑助手。用户会给出一篇期刊论文的英文标题，请：\n\
     1. 联网检索这篇论文，用中文写出不超过{ABSTRACT_MAX_CHARS}字的摘要；\n\
     2. 将标题和作者翻译为中文；\n\
     3. 用不超过{SUMMARY_MAX_CHARS}字概括论文的核心贡献。\n\
     只返回一个JSON对象，键为 translated_title、translated_authors、abstract、summary。"
  )
}

/// Reads a text field that the model may return as a string or as a list of strings.
fn text_field(reply: &Value, key: &str) -> Option<String> {
  let text = match reply.get(key)? {
    Value::String(s) => s.trim().to_string(),
    Value::Array(items) => items
      .iter()
      .filter_map(Value::as_str)
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .collect::<Vec<_>>()
      .join(AUTHOR_SEPARATOR),
    _ => return None,
  };
  (!text.is_empty()).then_some(text)
}

/// Parses the model's answer into the enriched fields of `base`.
fn parse_reply(mut base: NewArticle, content: &str) -> Result<NewArticle, String> {
  let cleaned = format::strip_code_fence(content);
  let reply: Value = serde_json::from_str(&cleaned).map_err(|e| format!("unparsable answer: {e}"))?;
  if !reply.is_object() {
    return Err(format!("expected a JSON object, got {}", format::preview(&cleaned, 40)));
  }

  if let Some(title) = text_field(&reply, "translated_title") {
    base.translated_title = title;
  }
  if let Some(authors) = text_field(&reply, "translated_authors") {
    base.translated_authors = authors;
  }
  base.abstract_text =
    text_field(&reply, "abstract").unwrap_or_else(|| ABSTRACT_UNAVAILABLE.to_string());
  base.summary = text_field(&reply, "summary").unwrap_or_else(|| SUMMARY_UNAVAILABLE.to_string());
  Ok(base)
}

/// Turns feed entries into enriched candidate articles.
pub struct Enricher {
  /// Model endpoint.
  model:      Arc<dyn LanguageModel>,
  /// Model name sent with each request.
  model_name: String,
}

impl Enricher {
  /// Creates an enricher that sends requests for `model_name` to `model`.
  pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
    Self { model, model_name: model_name.into() }
  }

  /// The request sent for `entry`.
  pub fn request_for(&self, entry: &FeedEntry) -> ChatRequest {
    ChatRequest::new(&self.model_name)
      .system(system_prompt())
      .user(format!("请处理：{}", entry.title))
      .temperature(TEMPERATURE)
      .json_output()
      .with_search()
  }

  /// Enriches one entry. Never fails; see the module docs for how failures degrade.
  pub async fn enrich(&self, entry: &FeedEntry) -> Outcome<NewArticle> {
    debug!(title = %format::preview(&entry.title, 60), "Enriching entry");

    let completion = match self.model.complete(&self.request_for(entry)).await {
      Ok(completion) => completion,
      Err(e) => {
        warn!(link = %entry.link, error = %e, "Enrichment service unavailable");
        return Outcome::Failed {
          value:  NewArticle::untranslated(entry, ABSTRACT_UNAVAILABLE, SERVICE_UNAVAILABLE),
          reason: e.to_string(),
        };
      },
    };

    let base = NewArticle::untranslated(entry, ABSTRACT_UNAVAILABLE, SUMMARY_UNAVAILABLE);
    match parse_reply(base, &completion.content) {
      Ok(article) => {
        trace!(title = %article.translated_title, "Enrichment parsed");
        Outcome::Success(article)
      },
      Err(reason) => {
        warn!(link = %entry.link, %reason, "Enrichment answer unusable, keeping original fields");
        Outcome::Fallback {
          value: NewArticle::untranslated(entry, PROCESSING_FAILED, PROCESSING_FAILED),
          reason,
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clients::chat::testing::{Reply, ScriptedModel};

  fn entry() -> FeedEntry {
    FeedEntry {
      journal:   "Nature".to_string(),
      title:     "A room-temperature quantum memory".to_string(),
      authors:   vec!["Grace Hopper".to_string(), "Katherine Johnson".to_string()],
      link:      "https://www.nature.com/articles/s41586-024-00001-1".to_string(),
      published: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap().and_hms_opt(8, 0, 0).unwrap(),
    }
  }

  fn enricher(replies: Vec<Reply>) -> (Arc<ScriptedModel>, Enricher) {
    let model = Arc::new(ScriptedModel::new(replies));
    let enricher = Enricher::new(model.clone(), "qwen-plus");
    (model, enricher)
  }

  #[tokio::test]
  async fn test_enrich_success() {
    let (model, enricher) = enricher(vec![Reply::content(
      "```json\n{\"translated_title\": \"室温量子存储器\", \"translated_authors\": [\"格蕾丝·霍珀\", \
       \"凯瑟琳·约翰逊\"], \"abstract\": \"本文报道了一种室温量子存储器。\", \"summary\": \
       \"室温量子存储。\"}\n```",
    )]);

    let outcome = enricher.enrich(&entry()).await;
    assert!(outcome.is_success());
    let article = outcome.into_value();
    assert_eq!(article.translated_title, "室温量子存储器");
    assert_eq!(article.translated_authors, "格蕾丝·霍珀, 凯瑟琳·约翰逊");
    assert_eq!(article.original_title, "A room-temperature quantum memory");
    assert_eq!(article.original_authors, "Grace Hopper, Katherine Johnson");
    assert!(article.has_usable_abstract());

    let request = &model.requests()[0];
    assert_eq!(request.temperature, Some(0.3));
    assert_eq!(request.enable_search, Some(true));
    assert!(request.response_format.is_some());
    assert_eq!(request.messages[1].content, "请处理：A room-temperature quantum memory");
  }

  #[tokio::test]
  async fn test_enrich_missing_fields_use_sentinels() {
    let (_, enricher) = enricher(vec![Reply::content("{\"translated_title\": \"室温量子存储器\"}")]);

    let article = enricher.enrich(&entry()).await.into_value();
    assert_eq!(article.translated_title, "室温量子存储器");
    assert_eq!(article.translated_authors, "Grace Hopper, Katherine Johnson");
    assert_eq!(article.abstract_text, ABSTRACT_UNAVAILABLE);
    assert_eq!(article.summary, SUMMARY_UNAVAILABLE);
  }

  #[traced_test]
  #[tokio::test]
  async fn test_enrich_unparsable_answer_falls_back() {
    let (_, enricher) = enricher(vec![Reply::content("抱歉，我无法找到这篇论文。")]);

    let outcome = enricher.enrich(&entry()).await;
    assert!(matches!(outcome, Outcome::Fallback { .. }));
    let article = outcome.into_value();
    assert_eq!(article.translated_title, article.original_title);
    assert_eq!(article.abstract_text, PROCESSING_FAILED);
    assert_eq!(article.summary, PROCESSING_FAILED);
    assert!(logs_contain("Enrichment answer unusable"));
  }

  #[tokio::test]
  async fn test_enrich_non_object_answer_falls_back() {
    let (_, enricher) = enricher(vec![Reply::content("[\"室温量子存储器\"]")]);
    assert!(matches!(enricher.enrich(&entry()).await, Outcome::Fallback { .. }));
  }

  #[tokio::test]
  async fn test_enrich_service_failure_keeps_base_fields() {
    let (_, enricher) = enricher(vec![Reply::Unavailable]);

    let outcome = enricher.enrich(&entry()).await;
    assert!(outcome.is_failed());
    let article = outcome.into_value();
    assert_eq!(article.link, entry().link);
    assert_eq!(article.publish_date, NaiveDate::from_ymd_opt(2024, 5, 14).unwrap());
    assert_eq!(article.translated_title, article.original_title);
    assert_eq!(article.abstract_text, ABSTRACT_UNAVAILABLE);
    assert_eq!(article.summary, SERVICE_UNAVAILABLE);
    assert!(!article.has_usable_abstract());
  }
}
