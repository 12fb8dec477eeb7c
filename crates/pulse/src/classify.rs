//! Research-field classification.
//!
//! [`FieldClassifier::classify`] asks the model which fields of the configured [`Taxonomy`] an
//! article belongs to and how confident it is. Only confident answers survive: [`FieldScores`]
//! refuses any score outside `(0.5, 1.0]`, and names outside the taxonomy are dropped before
//! they reach it. A failed call yields empty scores, which callers must read as "unclassified".
//!
//! [`FieldClassifier::is_related`] is the older one-field-at-a-time yes/no judgement. It fails
//! closed: any service error answers "not related".
//!
//! # Examples
//!
//! ```
//! use pulse::classify::FieldScores;
//!
//! let mut scores = FieldScores::new();
//! assert!(scores.insert("生命科学与生物医学工程", 0.92));
//! assert!(!scores.insert("化学与材料科学", 0.4));
//! assert_eq!(scores.len(), 1);
//! ```

use serde_json::Value;

use super::*;
use crate::{article::is_usable_abstract, clients::ChatRequest, format};

/// Scores at or below this value are discarded.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Title length sent to the model, in characters.
pub const TITLE_MAX_CHARS: usize = 300;
/// Abstract length sent to the model, in characters.
pub const ABSTRACT_MAX_CHARS: usize = 2000;

/// Sampling temperature for classification requests.
const TEMPERATURE: f32 = 0.1;

/// Whether `confidence` is a score worth keeping.
pub fn passes_threshold(confidence: f64) -> bool {
  confidence.is_finite() && confidence > CONFIDENCE_THRESHOLD && confidence <= 1.0
}

/// Confident field scores of one article, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldScores(BTreeMap<String, f64>);

impl FieldScores {
  /// An empty set of scores.
  pub fn new() -> Self { Self::default() }

  /// Records `confidence` for `field` if it passes the threshold; returns whether it was kept.
  pub fn insert(&mut self, field: impl Into<String>, confidence: f64) -> bool {
    if !passes_threshold(confidence) {
      return false;
    }
    self.0.insert(field.into(), confidence);
    true
  }

  /// Confidence for `field`, if kept.
  pub fn get(&self, field: &str) -> Option<f64> { self.0.get(field).copied() }

  /// Number of kept fields.
  pub fn len(&self) -> usize { self.0.len() }

  /// Whether no field was kept.
  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// `(field, confidence)` pairs ordered by field name.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> { self.0.iter().map(|(f, c)| (f.as_str(), *c)) }
}

/// Reads a confidence sent as a number or as a numeric string.
fn confidence_of(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Assigns research fields to articles.
pub struct FieldClassifier {
  /// Model endpoint.
  model:      Arc<dyn LanguageModel>,
  /// Closed set of fields.
  taxonomy:   Taxonomy,
  /// Model name sent with each request.
  model_name: String,
}

impl FieldClassifier {
  /// Creates a classifier over `taxonomy`.
  pub fn new(model: Arc<dyn LanguageModel>, taxonomy: Taxonomy, model_name: impl Into<String>) -> Self {
    Self { model, taxonomy, model_name: model_name.into() }
  }

  /// The taxonomy this classifier chooses from.
  pub fn taxonomy(&self) -> &Taxonomy { &self.taxonomy }

  /// The paper description shared by both request kinds. Sentinel abstracts are left out.
  fn paper_text(title: &str, abstract_text: &str) -> String {
    let title = format::truncate_chars(title, TITLE_MAX_CHARS);
    if is_usable_abstract(abstract_text) {
      format!("标题：{title}\n摘要：{}", format::truncate_chars(abstract_text, ABSTRACT_MAX_CHARS))
    } else {
      format!("标题：{title}\n摘要：（无）")
    }
  }

  /// The request sent by [`FieldClassifier::classify`].
  pub fn request_for(&self, title: &str, abstract_text: &str) -> ChatRequest {
    let system = format!(
      "你是科研文献分类助手。判断用户给出的论文属于下列哪些研究领域（可多选）：{}。\n\
       为每个领域给出0到1之间的置信度，只列出置信度大于{CONFIDENCE_THRESHOLD}的领域，\
       严格按 {{\"fields\": {{\"领域名称\": 置信度}}}} 的JSON格式返回。",
      self.taxonomy.fields().join("、")
    );
    ChatRequest::new(&self.model_name)
      .system(system)
      .user(Self::paper_text(title, abstract_text))
      .temperature(TEMPERATURE)
      .json_output()
  }

  /// Parses a classification answer, keeping confident scores for taxonomy fields only.
  fn parse_reply(&self, content: &str) -> Result<FieldScores, String> {
    let reply: Value = serde_json::from_str(&format::strip_code_fence(content))
      .map_err(|e| format!("unparsable answer: {e}"))?;
    let fields = reply
      .get("fields")
      .and_then(Value::as_object)
      .ok_or_else(|| "answer has no \"fields\" object".to_string())?;

    let mut scores = FieldScores::new();
    for (field, value) in fields {
      if !self.taxonomy.contains(field) {
        trace!(%field, "Dropping field outside the taxonomy");
        continue;
      }
      let kept = confidence_of(value).is_some_and(|confidence| scores.insert(field.as_str(), confidence));
      if !kept {
        trace!(%field, %value, "Dropping low or invalid confidence");
      }
    }
    Ok(scores)
  }

  /// Classifies an article. Never fails: degraded outcomes carry empty scores.
  pub async fn classify(&self, title: &str, abstract_text: &str) -> Outcome<FieldScores> {
    let completion = match self.model.complete(&self.request_for(title, abstract_text)).await {
      Ok(completion) => completion,
      Err(e) => {
        warn!(title = %format::preview(title, 60), error = %e, "Classification service unavailable");
        return Outcome::Failed { value: FieldScores::new(), reason: e.to_string() };
      },
    };

    match self.parse_reply(&completion.content) {
      Ok(scores) => {
        if scores.is_empty() {
          info!(title = %format::preview(title, 60), "No confident field");
        }
        for (field, confidence) in scores.iter() {
          debug!(%field, confidence, "Field assigned");
        }
        Outcome::Success(scores)
      },
      Err(reason) => {
        warn!(title = %format::preview(title, 60), %reason, "Classification answer unusable");
        Outcome::Fallback { value: FieldScores::new(), reason }
      },
    }
  }

  /// Asks whether the article belongs to `field`, with a single-letter answer.
  ///
  /// A `field` outside the taxonomy is a configuration error and is reported before any call.
  /// Service errors answer `false`.
  pub async fn is_related(
    &self,
    title: &str,
    abstract_text: &str,
    field: &str,
  ) -> Result<Outcome<bool>, PulseError> {
    let field = self.taxonomy.require(field)?;
    let request = ChatRequest::new(&self.model_name)
      .system(format!(
        "你是科研文献分类助手。判断用户给出的论文是否明确属于“{field}”领域。\
         明确属于则只回答Y，不确定或不属于则只回答N，不要解释。"
      ))
      .user(Self::paper_text(title, abstract_text))
      .temperature(TEMPERATURE)
      .max_tokens(1);

    match self.model.complete(&request).await {
      Ok(completion) => {
        let related = completion.content.trim().eq_ignore_ascii_case("y");
        debug!(title = %format::preview(title, 60), %field, related, "Relatedness judged");
        Ok(Outcome::Success(related))
      },
      Err(e) => {
        warn!(%field, error = %e, "Relatedness check failed, treating as unrelated");
        Ok(Outcome::Failed { value: false, reason: e.to_string() })
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    article::ABSTRACT_UNAVAILABLE,
    clients::chat::testing::{Reply, ScriptedModel},
  };

  const ABSTRACT: &str = "We engineer a protein scaffold that catalyses C-H activation.";

  fn classifier(replies: Vec<Reply>) -> (Arc<ScriptedModel>, FieldClassifier) {
    let model = Arc::new(ScriptedModel::new(replies));
    let classifier = FieldClassifier::new(model.clone(), Taxonomy::default(), "qwen-plus");
    (model, classifier)
  }

  #[test]
  fn test_scores_enforce_threshold() {
    let mut scores = FieldScores::new();
    assert!(!scores.insert("地球科学", 0.5));
    assert!(!scores.insert("地球科学", 1.01));
    assert!(!scores.insert("地球科学", f64::NAN));
    assert!(scores.insert("地球科学", 1.0));
    assert!(scores.insert("物理学与力学", 0.51));
    assert_eq!(scores.get("地球科学"), Some(1.0));
    assert_eq!(scores.len(), 2);
  }

  #[tokio::test]
  async fn test_classify_keeps_confident_fields() {
    let (_, classifier) = classifier(vec![Reply::content(
      r#"{"fields": {"生命科学与生物医学工程": 0.92, "化学与材料科学": 0.4}}"#,
    )]);

    let outcome = classifier.classify("Designer enzymes", ABSTRACT).await;
    assert!(outcome.is_success());
    let scores = outcome.into_value();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores.get("生命科学与生物医学工程"), Some(0.92));
    assert_eq!(scores.get("化学与材料科学"), None);
  }

  #[tokio::test]
  async fn test_classify_drops_unknown_and_malformed_scores() {
    let (_, classifier) = classifier(vec![Reply::content(
      "```json\n{\"fields\": {\"炼金术\": 0.99, \"地球科学\": \"0.8\", \"物理学与力学\": \"high\", \
       \"能源与动力工程\": 1.5}}\n```",
    )]);

    let scores = classifier.classify("Deep mantle plumes", ABSTRACT).await.into_value();
    assert_eq!(scores.iter().collect::<Vec<_>>(), vec![("地球科学", 0.8)]);
  }

  #[tokio::test]
  async fn test_classify_degrades_to_empty() {
    let (_, classifier) = classifier(vec![Reply::content("not json"), Reply::Unavailable]);

    let outcome = classifier.classify("Designer enzymes", ABSTRACT).await;
    assert!(matches!(&outcome, Outcome::Fallback { value, .. } if value.is_empty()));

    let outcome = classifier.classify("Designer enzymes", ABSTRACT).await;
    assert!(matches!(&outcome, Outcome::Failed { value, .. } if value.is_empty()));
  }

  #[tokio::test]
  async fn test_request_caps_text_and_skips_sentinel_abstract() {
    let (model, classifier) = classifier(vec![
      Reply::content(r#"{"fields": {}}"#),
      Reply::content(r#"{"fields": {}}"#),
    ]);

    let long_abstract = "量".repeat(ABSTRACT_MAX_CHARS + 500);
    classifier.classify(&"T".repeat(TITLE_MAX_CHARS + 10), &long_abstract).await;
    classifier.classify("Designer enzymes", ABSTRACT_UNAVAILABLE).await;

    let requests = model.requests();
    let first = &requests[0].messages[1].content;
    assert_eq!(first.matches('量').count(), ABSTRACT_MAX_CHARS);
    assert_eq!(first.matches('T').count(), TITLE_MAX_CHARS);
    assert_eq!(requests[0].temperature, Some(0.1));
    assert!(requests[0].messages[0].content.contains("计算机科学与人工智能"));
    assert!(!requests[1].messages[1].content.contains(ABSTRACT_UNAVAILABLE));
  }

  #[tokio::test]
  async fn test_is_related() -> anyhow::Result<()> {
    let (model, classifier) =
      classifier(vec![Reply::content(" y\n"), Reply::content("N"), Reply::Unavailable]);

    assert_eq!(classifier.is_related("Enzymes", ABSTRACT, "生命科学与生物医学工程").await?, Outcome::Success(true));
    assert_eq!(classifier.is_related("Enzymes", ABSTRACT, "地球科学").await?, Outcome::Success(false));
    let failed = classifier.is_related("Enzymes", ABSTRACT, "地球科学").await?;
    assert!(failed.is_failed());
    assert!(!failed.value());
    assert_eq!(model.requests()[0].max_tokens, Some(1));
    Ok(())
  }

  #[tokio::test]
  async fn test_is_related_rejects_unknown_field_before_calling() {
    let (model, classifier) = classifier(vec![]);
    let result = classifier.is_related("Enzymes", ABSTRACT, "炼金术").await;
    assert!(matches!(result, Err(PulseError::UnknownField(_))));
    assert!(model.requests().is_empty());
  }
}
