use std::sync::LazyLock;

use regex::{Captures, Regex};

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)").expect("heading pattern"));
static TASK_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*]\s+\[ \]\s*(.*)").expect("open task pattern"));
static TASK_DONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*]\s+\[[xX]\]\s*(.*)").expect("done task pattern"));
static UNORDERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*]\s+(.*)").expect("unordered list pattern"));
static ORDERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)\d+\.\s+(.*)").expect("ordered list pattern"));
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---+\s*$").expect("horizontal rule pattern"));

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").expect("image pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link pattern"));
// Bold and italic share the asterisk delimiter. A single alternation pass
// keeps the rewritten single-asterisk bold output from being re-read as
// italic markers.
static BOLD_OR_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|\*([^*]+)\*").expect("emphasis pattern"));
static STRIKETHROUGH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~(.+?)~~").expect("strikethrough pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline code pattern"));

/// Convert inline Markdown markup to Jira wiki markup within a single line.
fn convert_inline(line: &str) -> String {
    // Images: ![alt](url) -> !url!
    let text = IMAGE.replace_all(line, "!$1!");
    // Links: [text](url) -> [text|url]
    let text = LINK.replace_all(&text, "[$1|$2]");
    // Bold: **text** -> *text*, italic: *text* -> _text_
    let text = BOLD_OR_ITALIC.replace_all(&text, |caps: &Captures| match caps.get(1) {
        Some(bold) => format!("*{}*", bold.as_str()),
        None => format!("_{}_", &caps[2]),
    });
    // Strikethrough: ~~text~~ -> -text-
    let text = STRIKETHROUGH.replace_all(&text, "-$1-");
    // Inline code: `code` -> {{code}}
    let text = INLINE_CODE.replace_all(&text, "{{$1}}");
    text.into_owned()
}

fn block_depth(indent: &str) -> usize {
    indent.chars().count() / 2 + 1
}

/// Line-by-line Markdown to Jira wiki markup conversion.
///
/// The only state carried across lines is the fenced-code-block flag; fence
/// interiors pass through verbatim. Outside a fence each line gets exactly
/// one classification, first match wins.
pub fn markdown_to_wiki(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut result = Vec::new();
    let mut in_code_block = false;

    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if in_code_block {
                in_code_block = false;
                result.push("{code}".to_string());
            } else {
                in_code_block = true;
                let lang = trimmed[3..].trim();
                if lang.is_empty() {
                    result.push("{code}".to_string());
                } else {
                    result.push(format!("{{code:{lang}}}"));
                }
            }
            continue;
        }

        if in_code_block {
            result.push(line.to_string());
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            let level = caps[1].len();
            result.push(format!("h{level}. {}", convert_inline(&caps[2])));
            continue;
        }

        // Task lists: - [ ] -> * (x), - [x] -> * (/)
        if let Some(caps) = TASK_OPEN.captures(line) {
            let marker = "*".repeat(block_depth(&caps[1]));
            result.push(format!("{marker} (x) {}", convert_inline(&caps[2])));
            continue;
        }
        if let Some(caps) = TASK_DONE.captures(line) {
            let marker = "*".repeat(block_depth(&caps[1]));
            result.push(format!("{marker} (/) {}", convert_inline(&caps[2])));
            continue;
        }

        if let Some(caps) = UNORDERED.captures(line) {
            let marker = "*".repeat(block_depth(&caps[1]));
            result.push(format!("{marker} {}", convert_inline(&caps[2])));
            continue;
        }

        if let Some(caps) = ORDERED.captures(line) {
            let marker = "#".repeat(block_depth(&caps[1]));
            result.push(format!("{marker} {}", convert_inline(&caps[2])));
            continue;
        }

        if HORIZONTAL_RULE.is_match(line) {
            result.push("----".to_string());
            continue;
        }

        result.push(convert_inline(line));
    }

    result.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{convert_inline, markdown_to_wiki};

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(markdown_to_wiki(""), "");
    }

    #[test]
    fn converts_headings() {
        assert_eq!(markdown_to_wiki("# Title"), "h1. Title");
        assert_eq!(markdown_to_wiki("### Sub"), "h3. Sub");
        assert_eq!(markdown_to_wiki("###### Deep"), "h6. Deep");
    }

    #[test]
    fn converts_task_lists() {
        assert_eq!(markdown_to_wiki("- [ ] todo"), "* (x) todo");
        assert_eq!(markdown_to_wiki("- [x] done"), "* (/) done");
        assert_eq!(markdown_to_wiki("- [X] done"), "* (/) done");
        assert_eq!(markdown_to_wiki("  - [ ] nested"), "** (x) nested");
    }

    #[test]
    fn converts_lists_with_indentation() {
        assert_eq!(markdown_to_wiki("- item"), "* item");
        assert_eq!(markdown_to_wiki("  - nested"), "** nested");
        assert_eq!(markdown_to_wiki("    - deeper"), "*** deeper");
        assert_eq!(markdown_to_wiki("1. first"), "# first");
        assert_eq!(markdown_to_wiki("  2. nested"), "## nested");
    }

    #[test]
    fn converts_horizontal_rule() {
        assert_eq!(markdown_to_wiki("---"), "----");
        assert_eq!(markdown_to_wiki("-----"), "----");
    }

    #[test]
    fn converts_inline_markup_in_order() {
        assert_eq!(convert_inline("![alt](http://e/x.png)"), "!http://e/x.png!");
        assert_eq!(convert_inline("[text](http://e)"), "[text|http://e]");
        assert_eq!(convert_inline("**bold**"), "*bold*");
        assert_eq!(convert_inline("~~gone~~"), "-gone-");
        assert_eq!(convert_inline("*italic*"), "_italic_");
        assert_eq!(convert_inline("`code`"), "{{code}}");
    }

    #[test]
    fn bold_output_is_not_reread_as_italic() {
        assert_eq!(convert_inline("**bold** and *italic*"), "*bold* and _italic_");
    }

    #[test]
    fn heading_task_and_bold_scenario() {
        let input = "# Title\n- [ ] todo\n**bold**";
        assert_eq!(markdown_to_wiki(input), "h1. Title\n* (x) todo\n*bold*");
    }

    #[test]
    fn fenced_code_block_passes_through_verbatim() {
        let input = "```rust\nlet x = **not bold**;\n- [ ] not a task\n```\nafter **bold**";
        let expected = "{code:rust}\nlet x = **not bold**;\n- [ ] not a task\n{code}\nafter *bold*";
        assert_eq!(markdown_to_wiki(input), expected);
    }

    #[test]
    fn fence_without_language_uses_bare_code_macro() {
        assert_eq!(markdown_to_wiki("```\nx\n```"), "{code}\nx\n{code}");
    }

    #[test]
    fn lists_get_inline_conversion() {
        assert_eq!(markdown_to_wiki("- **bold** item"), "* *bold* item");
        assert_eq!(markdown_to_wiki("1. [a](http://b)"), "# [a|http://b]");
    }
}
