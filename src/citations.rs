use regex::Regex;
use std::collections::BTreeSet;

/// How much of a cited passage is shown in the sources panel.
pub const SOURCE_PREVIEW_CHARS: usize = 250;

/// Fallback label when a passage carries no `Title:` line.
pub const GENERIC_SOURCE_LABEL: &str = "Source";

/// One entry of the "sources used" panel under an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// 1-based index into the context passages, as cited by the answer.
    pub number: usize,
    pub title: Option<String>,
    pub preview: String,
}

impl Source {
    pub fn label(&self) -> String {
        format!(
            "[{}] {}",
            self.number,
            self.title.as_deref().unwrap_or(GENERIC_SOURCE_LABEL)
        )
    }
}

/// Collect the distinct citation markers `[n]` from an answer, keeping only
/// those that fall inside the context bounds, in ascending order.
///
/// Out-of-range markers are dropped silently: the answer text is free-form
/// model output and a stray `[7]` with three passages is not an error worth
/// surfacing to the user.
pub fn cited_numbers(answer: &str, context_len: usize) -> Vec<usize> {
    let marker = Regex::new(r"\[(\d+)\]").unwrap();

    let mut numbers: BTreeSet<usize> = BTreeSet::new();
    for captures in marker.captures_iter(answer) {
        if let Ok(n) = captures[1].parse::<usize>() {
            if n >= 1 && n <= context_len {
                numbers.insert(n);
            }
        }
    }

    numbers.into_iter().collect()
}

/// Build the sources panel for an answer: one entry per distinct in-range
/// citation, ascending, each with a best-effort title and a truncated preview.
pub fn cited_sources(answer: &str, context: &[String]) -> Vec<Source> {
    cited_numbers(answer, context.len())
        .into_iter()
        .map(|number| {
            let passage = &context[number - 1];
            Source {
                number,
                title: passage_title(passage),
                preview: passage.chars().take(SOURCE_PREVIEW_CHARS).collect(),
            }
        })
        .collect()
}

/// Best-effort title extraction: the text following a literal `Title:` label,
/// up to the end of that line. This is a presentation heuristic, not a parser;
/// passages without the label simply get the generic fallback.
fn passage_title(passage: &str) -> Option<String> {
    let title = Regex::new(r"Title:\s*([^\n]+)").unwrap();

    title
        .captures(passage)
        .map(|captures| captures[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(passages: &[&str]) -> Vec<String> {
        passages.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_cited_numbers_distinct_and_ascending() {
        let numbers = cited_numbers("See [3], then [1], then [3] again.", 3);
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_cited_numbers_drops_out_of_range() {
        let numbers = cited_numbers("Bogus [0] and [4] citations, valid [2].", 3);
        assert_eq!(numbers, vec![2]);
    }

    #[test]
    fn test_cited_numbers_empty_without_markers() {
        assert!(cited_numbers("No citations at all.", 5).is_empty());
        assert!(cited_numbers("[1]", 0).is_empty());
    }

    #[test]
    fn test_cited_sources_extracts_title() {
        let ctx = context(&["Title: Doc A\nFirst passage body."]);
        let sources = cited_sources("X is Y [1].", &ctx);

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].number, 1);
        assert_eq!(sources[0].title.as_deref(), Some("Doc A"));
        assert_eq!(sources[0].label(), "[1] Doc A");
    }

    #[test]
    fn test_cited_sources_generic_label_without_title() {
        let ctx = context(&["A passage with no title line at all."]);
        let sources = cited_sources("Answer [1].", &ctx);

        assert_eq!(sources[0].title, None);
        assert_eq!(sources[0].label(), "[1] Source");
    }

    #[test]
    fn test_preview_truncated_to_250_chars() {
        let long_passage = "x".repeat(600);
        let ctx = context(&[long_passage.as_str()]);
        let sources = cited_sources("Look at [1].", &ctx);

        assert_eq!(sources[0].preview.chars().count(), SOURCE_PREVIEW_CHARS);
    }

    #[test]
    fn test_preview_shorter_passage_kept_whole() {
        let ctx = context(&["short"]);
        let sources = cited_sources("[1]", &ctx);
        assert_eq!(sources[0].preview, "short");
    }

    #[test]
    fn test_title_taken_from_first_label_line() {
        let ctx = context(&["preamble\nTitle: Second Line Doc  \nbody text"]);
        let sources = cited_sources("[1]", &ctx);
        assert_eq!(sources[0].title.as_deref(), Some("Second Line Doc"));
    }
}
