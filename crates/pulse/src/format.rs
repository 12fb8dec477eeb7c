//! Text utilities shared by the prompt builders and the log output.
//!
//! Titles and abstracts are frequently Chinese, so every length limit here counts `char`s,
//! never bytes.
//!
//! # Examples
//!
//! ```
//! use pulse::format;
//!
//! assert_eq!(format::truncate_chars("量子传感器研究", 4), "量子传感");
//! assert_eq!(format::preview("A Very Long Document Title", 6), "A Very...");
//! assert_eq!(format::strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
//! ```

/// Returns the longest prefix of `text` that has at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
  match text.char_indices().nth(max_chars) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}

/// Shortens `text` for a log line, appending `...` when something was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
  let cut = truncate_chars(text, max_chars);
  if cut.len() < text.len() {
    format!("{}...", cut.trim_end())
  } else {
    cut.to_string()
  }
}

/// Removes a surrounding Markdown code fence (```` ```lang ... ``` ````) and any stray fence
/// markers left inside the text.
///
/// Models wrap both JSON answers and Mermaid diagrams this way despite being told not to.
pub fn strip_code_fence(text: &str) -> String {
  let mut body = text.trim();

  if let Some(rest) = body.strip_prefix("```") {
    // Drop the info string (`mermaid`, `json`, ...) on the opening line.
    body = match rest.find('\n') {
      Some(newline) if !rest[..newline].contains("```") => &rest[newline + 1..],
      _ => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
  }
  if let Some(end) = body.rfind("```") {
    if body[end + 3..].trim().is_empty() {
      body = &body[..end];
    }
  }

  body.replace("```mermaid", "").replace("```", "").trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_chars() {
    assert_eq!(truncate_chars("hello", 10), "hello");
    assert_eq!(truncate_chars("hello", 0), "");
    assert_eq!(truncate_chars("生命科学与生物医学工程", 4), "生命科学");
  }

  #[test]
  fn test_preview() {
    assert_eq!(preview("short", 10), "short");
    assert_eq!(preview("This Is A Very Long Title", 9), "This Is A...");
  }

  #[test]
  fn test_strip_code_fence() {
    assert_eq!(
      strip_code_fence("```mermaid\ngraph TD\n    A --> B\n```"),
      "graph TD\n    A --> B"
    );
    assert_eq!(strip_code_fence("graph TD\n    A --> B"), "graph TD\n    A --> B");
    assert_eq!(strip_code_fence("  ```\nflowchart LR\nX-->Y\n```  "), "flowchart LR\nX-->Y");
    assert_eq!(strip_code_fence("```json\n{\"fields\": {}}\n```"), "{\"fields\": {}}");
    assert_eq!(strip_code_fence("graph TD\nA-->B\n```"), "graph TD\nA-->B");
  }
}
