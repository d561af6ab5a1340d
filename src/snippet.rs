/// Maximum number of snippets returned per document.
pub const DEFAULT_MAX_SNIPPETS: usize = 3;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Produces short excerpts of a document for display next to a hit.
pub trait SnippetExtractor: Send + Sync {
    /// `terms` are lowercase query terms; an empty slice means no snippets.
    fn snippets(&self, text: &str, terms: &[String]) -> Vec<String>;
}

/// Line-oriented snippets: the first lines containing any query term.
///
/// Matching is a case-insensitive substring test, not token-aware.
#[derive(Debug, Clone, Copy)]
pub struct LineSnippetExtractor {
    pub max_snippets: usize,
    pub max_chars: usize,
}

impl Default for LineSnippetExtractor {
    fn default() -> Self {
        Self {
            max_snippets: DEFAULT_MAX_SNIPPETS,
            max_chars: DEFAULT_SNIPPET_MAX_CHARS,
        }
    }
}

impl SnippetExtractor for LineSnippetExtractor {
    fn snippets(&self, text: &str, terms: &[String]) -> Vec<String> {
        if terms.is_empty() {
            return Vec::new();
        }

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| {
                let lower = line.to_lowercase();
                terms.iter().any(|t| lower.contains(t.as_str()))
            })
            .take(self.max_snippets)
            .map(|line| truncate_chars(line, self.max_chars))
            .collect()
    }
}

/// Cut `line` to `max_chars` characters, appending an ellipsis if cut.
pub fn truncate_chars(line: &str, max_chars: usize) -> String {
    match line.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{ELLIPSIS}", &line[..byte_idx]),
        None => line.to_string(),
    }
}

/// Plain lowercase terms of a query string, for snippet matching.
///
/// Drops boolean operators, field qualifiers, boosts and grouping
/// punctuation so that `title:rust AND "memory safety"^2` yields
/// `rust`, `memory`, `safety`. Negated clauses (`-term`, `NOT term`,
/// `-(a b)`, `NOT "a b"`) contribute nothing.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut negate_next = false;
    let mut skip = ClauseSkip::default();

    for raw in query.split_whitespace() {
        if skip.active() {
            skip.consume(raw);
            continue;
        }
        if raw == "NOT" {
            negate_next = true;
            continue;
        }
        if matches!(raw, "AND" | "OR" | "&&" | "||") {
            continue;
        }
        if let Some(rest) = raw.strip_prefix('-') {
            skip.consume(rest);
            negate_next = false;
            continue;
        }
        if negate_next {
            skip.consume(raw);
            negate_next = false;
            continue;
        }

        let value = raw.split_once(':').map_or(raw, |(_, v)| v);
        let value = value.split_once('^').map_or(value, |(v, _)| v);
        let cleaned: String = value
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if !cleaned.is_empty() && cleaned != "*" && !terms.contains(&cleaned) {
            terms.push(cleaned);
        }
    }
    terms
}

/// Tracks an open group or phrase while dropping a negated clause.
#[derive(Default)]
struct ClauseSkip {
    depth: usize,
    in_phrase: bool,
}

impl ClauseSkip {
    fn active(&self) -> bool {
        self.depth > 0 || self.in_phrase
    }

    fn consume(&mut self, token: &str) {
        for c in token.chars() {
            match c {
                '"' => self.in_phrase = !self.in_phrase,
                '(' if !self.in_phrase => self.depth += 1,
                ')' if !self.in_phrase => {
                    self.depth = self.depth.saturating_sub(1)
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn collects_matching_lines_case_insensitively() {
        let text = "intro\nRust is great\n\nnothing here\nI like RUST too";
        let out = LineSnippetExtractor::default().snippets(text, &terms(&["rust"]));
        assert_eq!(out, vec!["Rust is great", "I like RUST too"]);
    }

    #[test]
    fn caps_at_three_snippets() {
        let text = "a error\nb error\nc error\nd error";
        let out =
            LineSnippetExtractor::default().snippets(text, &terms(&["error"]));
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], "c error");
    }

    #[test]
    fn trims_and_skips_blank_lines() {
        let text = "   \n   padded error line   \n";
        let out =
            LineSnippetExtractor::default().snippets(text, &terms(&["error"]));
        assert_eq!(out, vec!["padded error line"]);
    }

    #[test]
    fn truncates_long_lines_with_ellipsis() {
        let long = format!("error {}", "x".repeat(300));
        let out =
            LineSnippetExtractor::default().snippets(&long, &terms(&["error"]));
        assert_eq!(out[0].chars().count(), DEFAULT_SNIPPET_MAX_CHARS + 3);
        assert!(out[0].ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let line = "é".repeat(10);
        assert_eq!(truncate_chars(&line, 4), "éééé...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn no_terms_means_no_snippets() {
        let out = LineSnippetExtractor::default().snippets("anything", &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn query_terms_strip_syntax() {
        assert_eq!(
            query_terms("title:Rust AND \"memory safety\"^2"),
            vec!["rust", "memory", "safety"]
        );
        assert_eq!(query_terms("(error OR warn) -debug"), vec![
            "error", "warn"
        ]);
        assert!(query_terms("  * ").is_empty());
        assert_eq!(query_terms("rust rust"), vec!["rust"]);
    }

    #[test]
    fn negated_clauses_do_not_become_snippet_terms() {
        assert_eq!(query_terms("error AND NOT debug"), vec!["error"]);
        assert_eq!(query_terms("NOT title:draft report"), vec!["report"]);
        assert_eq!(query_terms("rust -(unsafe OR ffi) borrow"), vec![
            "rust", "borrow"
        ]);
        assert_eq!(query_terms("NOT \"old stuff\" new"), vec!["new"]);
        assert!(query_terms("-debug").is_empty());
    }
}
