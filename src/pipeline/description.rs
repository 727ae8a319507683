//! Project description: README markdown → receipt HTML.
//!
//! Project READMEs are written for GitHub, not for an 80 mm receipt. Before
//! conversion we:
//!
//! 1. drop a leading `---` … `---` metadata block (front matter),
//! 2. drop the first `# ` heading, which repeats the project name already
//!    printed above the description,
//! 3. flatten every remaining heading to [`HEADING_DEPTH`] so nested
//!    sections do not outweigh the receipt's own headings.
//!
//! Lines inside fenced code blocks are never treated as headings.

use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

/// Level every heading is rewritten to.
pub const HEADING_DEPTH: usize = 3;

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}#{1,6}(?:[ \t]+|$)").unwrap());

static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}#(?:[ \t]+|$)").unwrap());

/// Apply the three preprocessing rules and return the cleaned markdown.
pub fn preprocess_markdown(input: &str) -> String {
    let s = input.replace("\r\n", "\n");
    let s = strip_front_matter(&s);
    let s = strip_title(s);
    normalise_headings(&s)
}

/// Preprocess and convert to HTML.
pub fn render_description(input: &str) -> String {
    let markdown = preprocess_markdown(input);
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(&markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

// ── Rule 1: front matter ─────────────────────────────────────────────────────

fn strip_front_matter(input: &str) -> &str {
    let body = input.trim_start_matches('\u{FEFF}');
    let Some(rest) = body.strip_prefix("---\n") else {
        return input;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return &rest[offset..];
        }
    }
    // Unterminated block: leave the text alone rather than eat the README.
    input
}

// ── Rule 2: title ────────────────────────────────────────────────────────────

fn strip_title(input: &str) -> String {
    let mut in_fence = false;
    let mut removed = false;
    let mut out = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        if !removed && !in_fence && RE_TITLE.is_match(content(line)) {
            removed = true;
            continue;
        }
        out.push_str(line);
    }
    out
}

// ── Rule 3: heading depth ────────────────────────────────────────────────────

fn normalise_headings(input: &str) -> String {
    let marker = format!("{} ", "#".repeat(HEADING_DEPTH));
    let mut in_fence = false;
    let mut out = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        if is_fence(line) {
            in_fence = !in_fence;
            out.push_str(line);
            continue;
        }
        if !in_fence {
            if let Some(m) = RE_HEADING.find(content(line)) {
                out.push_str(&marker);
                out.push_str(&line[m.end()..]);
                continue;
            }
        }
        out.push_str(line);
    }
    out
}

/// `line` without its line terminator, so `$` in the heading patterns
/// matches at the end of the line.
fn content(line: &str) -> &str {
    line.trim_end_matches('\n')
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

// ── Plain text for the PDF renderer ─────────────────────────────────────────

static RE_BLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</(?:p|h[1-6]|li|pre|tr|blockquote)>").unwrap());
static RE_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li[^>]*>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Flatten rendered description HTML into wrapped-text friendly lines.
pub fn to_plain_text(html: &str) -> String {
    let s = RE_BLOCK_END.replace_all(html, "\n");
    let s = RE_LIST_ITEM.replace_all(&s, "• ");
    let s = RE_TAG.replace_all(&s, "");
    let s = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let s = RE_BLANK_LINES.replace_all(&s, "\n\n");
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const README: &str = "---\nname: Hackpad\nauthor: ada\n---\n# Hackpad\n\nA macropad.\n\n## Parts\n\n- switch\n";

    #[test]
    fn preprocessing_removes_front_matter_and_title() {
        let out = preprocess_markdown(README);
        assert!(!out.contains("author: ada"), "got: {out}");
        assert!(!out.contains("---"), "got: {out}");
        assert!(!out.lines().any(|l| l == "# Hackpad"), "got: {out}");
        assert!(out.contains("### Parts"), "got: {out}");
        assert!(out.contains("A macropad."));
    }

    #[test]
    fn html_has_normalised_heading_only() {
        let html = render_description(README);
        assert!(!html.contains("<h1>"), "got: {html}");
        assert!(!html.contains("Hackpad</h"), "got: {html}");
        assert!(html.contains("<h3>Parts</h3>"), "got: {html}");
        assert!(html.contains("<li>switch</li>"), "got: {html}");
    }

    #[test]
    fn deep_and_shallow_headings_flatten() {
        let out = normalise_headings("# a\n#### b\n###### c\n#nospace\n");
        assert_eq!(out, "### a\n### b\n### c\n#nospace\n");
    }

    #[test]
    fn empty_heading_lines_are_recognised() {
        assert_eq!(normalise_headings("##\ntext\n#\n"), "### \ntext\n### \n");
        let out = preprocess_markdown("#\nbody\n## Next\n");
        assert_eq!(out, "body\n### Next\n");
    }

    #[test]
    fn fenced_code_is_left_alone() {
        let input = "# Title\n```sh\n# not a heading\n```\n## Real\n";
        let out = preprocess_markdown(input);
        assert!(out.contains("# not a heading"), "got: {out}");
        assert!(out.contains("### Real"), "got: {out}");
        assert!(!out.contains("Title"));
    }

    #[test]
    fn unterminated_front_matter_is_kept() {
        let input = "---\nnot closed\n# Title\nbody\n";
        let out = preprocess_markdown(input);
        assert!(out.contains("not closed"));
        assert!(!out.contains("Title"));
    }

    #[test]
    fn only_first_title_is_stripped() {
        let out = preprocess_markdown("# One\ntext\n# Two\n");
        assert!(!out.contains("One"));
        assert!(out.contains("### Two"));
    }

    #[test]
    fn crlf_input_is_handled() {
        let out = preprocess_markdown("---\r\na: b\r\n---\r\n# T\r\n## S\r\n");
        assert_eq!(out.trim(), "### S");
    }

    #[test]
    fn plain_text_flattens_html() {
        let html = render_description("## Parts\n\n- a & b\n- c\n\nDone.");
        let text = to_plain_text(&html);
        assert!(text.starts_with("Parts"), "got: {text}");
        assert!(text.contains("• a & b"), "got: {text}");
        assert!(text.ends_with("Done."), "got: {text}");
        assert!(!text.contains('<'));
    }
}
