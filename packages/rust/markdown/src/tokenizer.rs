//! Splits an assembled message into prose and `<details>` block segments.
//!
//! Each begin marker pairs with the nearest following end marker, so
//! sequential blocks come out as separate segments. A begin marker with no
//! end marker after it is left in the surrounding prose.

use std::sync::LazyLock;

use regex::Regex;

/// Literal fence line placed before a source block.
pub(crate) const FENCE_OPEN: &str = "```\n";

/// Literal fence line placed after a source block.
pub(crate) const FENCE_CLOSE: &str = "\n```";

const BLOCK_CLOSE: &str = "</details>";

/// Matches a `<details>` begin marker, with or without attributes.
static BLOCK_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<details(?:\s[^>]*)?>").expect("block open regex")
});

/// Matches the attribute that marks a collapsible reasoning block.
static REASONING_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\btype\s*=\s*["']?reasoning\b"#).expect("reasoning attr regex")
});

/// A typed slice of an assembled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Ordinary text outside any block.
    Prose(&'a str),
    /// A source block that still needs its fence.
    SourceBlock(&'a str),
    /// A source block already wrapped in a fence, fence lines included.
    FencedBlock(&'a str),
    /// A collapsible reasoning block.
    ReasoningBlock(&'a str),
}

/// Tokenize `message` into segments. Concatenating the segment texts
/// reproduces the input exactly.
pub fn tokenize(message: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut prose_start = 0;
    let mut cursor = 0;

    while let Some(open) = BLOCK_OPEN_RE.find_at(message, cursor) {
        let Some(close_rel) = message[open.end()..].find(BLOCK_CLOSE) else {
            break;
        };
        let block_end = open.end() + close_rel + BLOCK_CLOSE.len();
        let pending = &message[prose_start..open.start()];

        let (start, end, segment) = if REASONING_ATTR_RE.is_match(open.as_str()) {
            (
                open.start(),
                block_end,
                Segment::ReasoningBlock(&message[open.start()..block_end]),
            )
        } else if pending.ends_with(FENCE_OPEN) && message[block_end..].starts_with(FENCE_CLOSE) {
            let start = open.start() - FENCE_OPEN.len();
            let end = block_end + FENCE_CLOSE.len();
            (start, end, Segment::FencedBlock(&message[start..end]))
        } else {
            (
                open.start(),
                block_end,
                Segment::SourceBlock(&message[open.start()..block_end]),
            )
        };

        if start > prose_start {
            segments.push(Segment::Prose(&message[prose_start..start]));
        }
        segments.push(segment);
        prose_start = end;
        cursor = end;
    }

    if prose_start < message.len() {
        segments.push(Segment::Prose(&message[prose_start..]));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(segments: &[Segment<'_>]) -> String {
        segments
            .iter()
            .map(|s| match s {
                Segment::Prose(t)
                | Segment::SourceBlock(t)
                | Segment::FencedBlock(t)
                | Segment::ReasoningBlock(t) => *t,
            })
            .collect()
    }

    #[test]
    fn plain_text_is_one_prose_segment() {
        let segments = tokenize("just words [1]");
        assert_eq!(segments, vec![Segment::Prose("just words [1]")]);
    }

    #[test]
    fn sequential_blocks_are_separate() {
        let input = "a<details>one</details>b<details>two</details>c";
        let segments = tokenize(input);
        assert_eq!(
            segments,
            vec![
                Segment::Prose("a"),
                Segment::SourceBlock("<details>one</details>"),
                Segment::Prose("b"),
                Segment::SourceBlock("<details>two</details>"),
                Segment::Prose("c"),
            ]
        );
        assert_eq!(rejoin(&segments), input);
    }

    #[test]
    fn unterminated_block_is_prose() {
        let input = "x<details>never closed [2]";
        assert_eq!(tokenize(input), vec![Segment::Prose(input)]);
    }

    #[test]
    fn fenced_block_is_recognized() {
        let input = "pre\n```\n<details>s</details>\n```\npost";
        let segments = tokenize(input);
        assert_eq!(
            segments,
            vec![
                Segment::Prose("pre\n"),
                Segment::FencedBlock("```\n<details>s</details>\n```"),
                Segment::Prose("\npost"),
            ]
        );
    }

    #[test]
    fn reasoning_block_is_typed() {
        let input = "<details type=\"reasoning\">\n<summary>t</summary>\nhmm\n</details>\nanswer";
        let segments = tokenize(input);
        assert!(matches!(segments[0], Segment::ReasoningBlock(_)));
        assert_eq!(segments[1], Segment::Prose("\nanswer"));
    }

    #[test]
    fn attributes_on_source_block_are_allowed() {
        let segments = tokenize("<details open><summary>Sources</summary></details>");
        assert!(matches!(segments[0], Segment::SourceBlock(_)));
    }

    #[test]
    fn lookalike_tags_are_not_blocks() {
        let input = "<detailsx>no</details>";
        assert_eq!(tokenize(input), vec![Segment::Prose(input)]);
    }
}
