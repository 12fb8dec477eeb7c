//! Logic graphs: a Mermaid diagram of an article's argument, produced by a reasoning model.
//!
//! The model is asked to draw the diagram, turn it back into prose in its reasoning and check
//! that prose against the abstract. Three artifacts come out of one call:
//! - the diagram, taken from the answer with any code fence removed,
//! - the full reasoning trace,
//! - a verification excerpt cut from the end of the trace (see [`extract_verification`]).
//!
//! A failed call produces [`GeneratedGraph::failed`], which is stored like any other graph so
//! that the batch does not retry it on its own.

use super::*;
use crate::{clients::ChatRequest, format};

/// Reasoning stored when generation failed.
pub const FAILED_REASONING: &str = "生成失败";
/// Diagram stored when generation failed.
pub const FAILED_DIAGRAM: &str = "graph TD\n    A[生成失败] --> B[请稍后再试]";
/// Verification stored when generation failed.
pub const FAILED_VERIFICATION: &str = "生成失败，请稍后再试";

/// Phrases that introduce the self-check in a reasoning trace.
const VERIFICATION_MARKERS: [&str; 7] =
  ["验证：", "验证", "对比：", "对比", "转化为文字：", "文字描述：", "文字表述："];

/// The artifacts of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedGraph {
  /// Mermaid source without code fences
  pub diagram:      String,
  /// Reasoning trace
  pub reasoning:    String,
  /// Verification excerpt
  pub verification: String,
}

impl GeneratedGraph {
  /// The artifacts stored when generation failed.
  pub fn failed() -> Self {
    Self {
      diagram:      FAILED_DIAGRAM.to_string(),
      reasoning:    FAILED_REASONING.to_string(),
      verification: FAILED_VERIFICATION.to_string(),
    }
  }

  /// Whether these are the failure artifacts.
  pub fn is_failed(&self) -> bool { self.diagram == FAILED_DIAGRAM }
}

/// Cuts the self-verification part out of a reasoning trace.
///
/// The excerpt is everything after the verification marker that starts last in the trace; when
/// two markers start at the same place the longer one wins. Without a marker, or when nothing
/// follows it, the last third of the trace's lines is returned.
///
/// ```
/// use pulse::graph::extract_verification;
///
/// let trace = "先梳理概念。\n验证：图中的因果链与摘要一致。";
/// assert_eq!(extract_verification(trace), "图中的因果链与摘要一致。");
///
/// let trace = "第一行\n第二行\n第三行";
/// assert_eq!(extract_verification(trace), "第三行");
/// ```
pub fn extract_verification(reasoning: &str) -> String {
  let last_marker = VERIFICATION_MARKERS
    .iter()
    .filter_map(|marker| reasoning.rfind(marker).map(|start| (start, marker.len())))
    .max();

  if let Some((start, len)) = last_marker {
    let excerpt = reasoning[start + len..].trim();
    if !excerpt.is_empty() {
      return excerpt.to_string();
    }
  }

  let lines: Vec<&str> = reasoning.trim().split('\n').collect();
  lines[lines.len() * 2 / 3..].join("\n")
}

/// Removes code fences around a Mermaid diagram.
pub fn clean_diagram(text: &str) -> String { format::strip_code_fence(text) }

/// Generates logic graphs with a reasoning model.
pub struct LogicGraphGenerator {
  /// Model endpoint.
  model:      Arc<dyn LanguageModel>,
  /// Reasoning model name sent with each request.
  model_name: String,
}

impl LogicGraphGenerator {
  /// Creates a generator that sends requests for `model_name` to `model`.
  pub fn new(model: Arc<dyn LanguageModel>, model_name: impl Into<String>) -> Self {
    Self { model, model_name: model_name.into() }
  }

  /// The request sent for an article.
  pub fn request_for(&self, title: &str, abstract_text: &str) -> ChatRequest {
    ChatRequest::new(&self.model_name).user(format!(
      "请把下面这篇论文的论证结构画成mermaid流程图或思维导图，读者是低年级本科生。\n\n\
       标题：{title}\n\n摘要：{abstract_text}\n\n\
       要求：\n\
       1. 找出文中的关键概念、实体和它们之间的关系；\n\
       2. 用mermaid语法画出这些关系；\n\
       3. 思考时把画好的图重新转述为文字，并与摘要对比验证，逻辑有误就重画；\n\
       4. 最终回答只包含mermaid代码。"
    ))
  }

  /// Generates the artifacts for one article.
  ///
  /// Callers are expected to skip articles whose abstract is a sentinel. The value is always
  /// storable: service errors and empty diagrams yield [`GeneratedGraph::failed`].
  pub async fn generate(&self, title: &str, abstract_text: &str) -> Outcome<GeneratedGraph> {
    info!(title = %format::preview(title, 30), "Generating logic graph");

    let completion = match self.model.complete(&self.request_for(title, abstract_text)).await {
      Ok(completion) => completion,
      Err(e) => {
        error!(title = %format::preview(title, 60), error = %e, "Logic graph generation failed");
        return Outcome::Failed { value: GeneratedGraph::failed(), reason: e.to_string() };
      },
    };

    let diagram = clean_diagram(&completion.content);
    if diagram.is_empty() {
      warn!(title = %format::preview(title, 60), "Reasoning model returned no diagram");
      return Outcome::Fallback {
        value:  GeneratedGraph::failed(),
        reason: "answer contained no diagram".to_string(),
      };
    }

    let reasoning = completion.reasoning.unwrap_or_default();
    let verification = extract_verification(&reasoning);
    trace!(chars = reasoning.chars().count(), "Reasoning trace received");
    Outcome::Success(GeneratedGraph { diagram, reasoning, verification })
  }
}
