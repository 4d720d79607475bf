//! Rendering of the cited-source list.
//!
//! The list is appended to the answer as a collapsible `<details>` block and,
//! separately, pushed to the host as one citation event per source.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use citeweave_shared::{CitationEvent, CitationMetadata, CitationSource, SourceEntry};

/// Render the source list as a `<details>` block.
///
/// Returns an empty string for an empty list. Excerpts are flattened to one
/// line each and angle brackets are escaped so an excerpt can never close the
/// block early.
pub fn render_source_block(sources: &[SourceEntry], label: &str) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "<details>");
    let _ = writeln!(out, "<summary>{}</summary>", escape_html(label));

    for entry in sources {
        out.push('\n');
        let _ = writeln!(
            out,
            "[{}] [{}]({})",
            entry.display_index,
            escape_link_text(&entry.title),
            escape_link_target(&entry.uri)
        );
        for excerpt in &entry.excerpts {
            let _ = writeln!(out, "> {}", flatten_excerpt(excerpt));
        }
    }

    out.push_str("</details>");
    out
}

/// One host citation event per source, stamped with `accessed`.
pub fn citation_events(sources: &[SourceEntry], accessed: DateTime<Utc>) -> Vec<CitationEvent> {
    let date_accessed = accessed.to_rfc3339();
    sources
        .iter()
        .map(|entry| {
            let document = if entry.excerpts.is_empty() {
                format!("[{}] {}", entry.display_index, entry.title)
            } else {
                format!("[{}] {}", entry.display_index, entry.excerpts.join("\n\n"))
            };
            CitationEvent {
                document: vec![document],
                metadata: vec![CitationMetadata {
                    date_accessed: date_accessed.clone(),
                    source: entry.title.clone(),
                }],
                source: CitationSource {
                    name: entry.title.clone(),
                    url: entry.uri.clone(),
                },
            }
        })
        .collect()
}

fn escape_html(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_link_text(title: &str) -> String {
    escape_html(title).replace('[', "\\[").replace(']', "\\]")
}

/// Percent-encode what would end the link target or the block early.
fn escape_link_target(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    for c in uri.chars() {
        match c {
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            ' ' => out.push_str("%20"),
            c if c.is_whitespace() => {
                for byte in c.to_string().bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn flatten_excerpt(excerpt: &str) -> String {
    let escaped = escape_html(excerpt.trim());
    escaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(n: usize, title: &str, excerpts: &[&str]) -> SourceEntry {
        SourceEntry {
            display_index: n,
            title: title.into(),
            uri: format!("https://example.com/{n}"),
            excerpts: excerpts.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn empty_list_renders_nothing() {
        assert_eq!(render_source_block(&[], "Sources"), "");
    }

    #[test]
    fn block_layout() {
        let block = render_source_block(
            &[entry(1, "Rust", &["Rust is fast."]), entry(3, "Tokio", &[])],
            "Sources",
        );
        assert_eq!(
            block,
            "<details>\n<summary>Sources</summary>\n\n\
             [1] [Rust](https://example.com/1)\n> Rust is fast.\n\n\
             [3] [Tokio](https://example.com/3)\n</details>"
        );
    }

    #[test]
    fn excerpt_cannot_close_the_block() {
        let block = render_source_block(&[entry(1, "T", &["a </details>\nb"])], "Sources");
        assert_eq!(block.matches("</details>").count(), 1);
        assert!(block.contains("> a &lt;/details&gt; b\n"));
    }

    #[test]
    fn title_brackets_are_escaped() {
        let block = render_source_block(&[entry(2, "[draft] notes", &[])], "Sources");
        assert!(block.contains("[2] [\\[draft\\] notes](https://example.com/2)"));
    }

    #[test]
    fn uri_cannot_break_link_or_block() {
        let mut source = entry(1, "Wiki", &[]);
        source.uri = "https://en.wikipedia.org/wiki/Rust_(language)</details>\nx y".into();
        let block = render_source_block(&[source], "Sources");
        assert!(block.contains(
            "[1] [Wiki](https://en.wikipedia.org/wiki/Rust_%28language%29%3C/details%3E%0Ax%20y)\n"
        ));
        assert_eq!(block.matches("</details>").count(), 1);
    }

    #[test]
    fn citation_event_fields() {
        let accessed = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let events = citation_events(
            &[entry(1, "Rust", &["one", "two"]), entry(2, "Docs", &[])],
            accessed,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].document, vec!["[1] one\n\ntwo"]);
        assert_eq!(events[0].metadata[0].date_accessed, "2026-01-02T03:04:05+00:00");
        assert_eq!(events[0].metadata[0].source, "Rust");
        assert_eq!(events[0].source.url, "https://example.com/1");
        assert_eq!(events[1].document, vec!["[2] Docs"]);
    }
}
