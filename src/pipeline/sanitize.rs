//! SVG output sanitization.
//!
//! A best-effort, pattern-based filter, not a parser-backed sanitizer. It
//! removes the constructs that make an SVG executable when inlined into a
//! page:
//!
//! - comments
//! - `<script>` blocks, and stray opening or closing script tags
//! - any element carrying an `on*` event-handler attribute
//! - CSS `expression(...)` / `expression:` and `url(` inside inline `style`
//!   attributes, rewritten to `SAFE_EXPRESSION` / `SAFE_URL`
//!
//! Text outside recognized tags is then escaped (`&`, `<`, `>`), leaving
//! existing entities alone. Removal runs until nothing changes, so markup
//! re-formed by a removal (`<scr<script></script>ipt>`) is caught too, and
//! `sanitize(sanitize(x)) == sanitize(x)`.
//!
//! The output is checked once more for script tags and event handlers; if
//! any survive, the call fails instead of returning unsafe markup.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::PipelineError;

/// Removal passes before giving up on reaching a fixpoint.
const MAX_PASSES: usize = 32;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b[^>]*>|</script\s*>").unwrap());

/// Tag body: quoted values may hold `>`, so they are consumed whole.
const TAG_BODY: &str = r#"(?:"[^"]*"|'[^']*'|[^<>"'])*"#;

/// Tag body for markup that is kept, where quoted values may not hold `<`.
const KEPT_TAG_BODY: &str = r#"(?:"[^"<]*"|'[^'<]*'|[^<>"'])*"#;

/// An opening tag with an event-handler attribute. Group 1 is the tag name.
static HANDLER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)<([A-Za-z][\w:-]*){}?\son\w+\s*={}>",
        TAG_BODY, TAG_BODY
    ))
    .unwrap()
});

static STYLE_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\sstyle\s*=\s*)("[^"]*"|'[^']*')"#).unwrap()
});

static CSS_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bexpression\s*([(:])").unwrap());

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\burl\s*\(").unwrap());

/// Markup that is left untouched by escaping.
static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)<\?xml[^<>]*\?>|<!DOCTYPE[^<>]*>|</?[A-Za-z][\w:-]*(?:\s+{})?/?>",
        KEPT_TAG_BODY
    ))
    .unwrap()
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);").unwrap()
});

static LEFTOVER_SCRIPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<script").unwrap());

static LEFTOVER_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)<[A-Za-z][\w:-]*{}\son\w+\s*=", KEPT_TAG_BODY)).unwrap()
});

/// Sanitize SVG markup for inlining.
pub fn sanitize(markup: &str) -> Result<String, PipelineError> {
    let mut current = markup.to_string();
    let mut settled = false;

    for _ in 0..MAX_PASSES {
        let next = strip_once(&current);
        if next == current {
            settled = true;
            break;
        }
        current = next;
    }

    if !settled {
        return Err(PipelineError::Sanitization(
            "markup did not settle after repeated stripping".to_string(),
        ));
    }

    let escaped = escape_text(&current);

    if LEFTOVER_SCRIPT.is_match(&escaped) {
        return Err(PipelineError::Sanitization(
            "script tag survived sanitization".to_string(),
        ));
    }
    if LEFTOVER_HANDLER.is_match(&escaped) {
        return Err(PipelineError::Sanitization(
            "event handler survived sanitization".to_string(),
        ));
    }

    Ok(escaped)
}

/// One round of every removal and rewrite rule.
fn strip_once(input: &str) -> String {
    let text = COMMENT.replace_all(input, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = SCRIPT_TAG.replace_all(&text, "");
    let text = strip_handler_elements(&text);
    rewrite_styles(&text).into_owned()
}

/// Remove every element that carries an event handler.
///
/// The element is removed up to the first matching close tag; a self-closing
/// or unclosed element loses just its opening tag.
fn strip_handler_elements(input: &str) -> String {
    let mut text = input.to_string();

    loop {
        let (start, tag_end, name) = match HANDLER_TAG.captures(&text) {
            Some(caps) => match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(name)) => {
                    (whole.start(), whole.end(), name.as_str().to_string())
                }
                _ => break,
            },
            None => break,
        };
        let self_closing = text[start..tag_end].ends_with("/>");

        let end = if self_closing {
            tag_end
        } else {
            find_close_tag(&text[tag_end..], &name)
                .map(|offset| tag_end + offset)
                .unwrap_or(tag_end)
        };

        text.replace_range(start..end, "");
    }

    text
}

/// Byte offset just past the first `</name>` in `haystack`, if any.
///
/// Matches the name case-insensitively and allows whitespace before `>`.
fn find_close_tag(haystack: &str, name: &str) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    let needle = format!("</{}", name.to_ascii_lowercase());

    lower.match_indices(&needle).find_map(|(start, _)| {
        let after = start + needle.len();
        let rest = &lower[after..];
        let trimmed = rest.trim_start();
        trimmed
            .starts_with('>')
            .then(|| after + (rest.len() - trimmed.len()) + 1)
    })
}

fn rewrite_styles(input: &str) -> Cow<'_, str> {
    STYLE_ATTRIBUTE.replace_all(input, |caps: &Captures| {
        let value = CSS_EXPRESSION.replace_all(&caps[2], "SAFE_EXPRESSION$1");
        let value = CSS_URL.replace_all(&value, "SAFE_URL(");
        format!("{}{}", &caps[1], value)
    })
}

/// Escape `&`, `<` and `>` everywhere except inside recognized markup.
fn escape_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for tag in MARKUP.find_iter(input) {
        escape_into(&input[last..tag.start()], &mut output);
        output.push_str(tag.as_str());
        last = tag.end();
    }
    escape_into(&input[last..], &mut output);

    output
}

fn escape_into(text: &str, output: &mut String) {
    for (i, ch) in text.char_indices() {
        match ch {
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '&' if !ENTITY.is_match(&text[i..]) => output.push_str("&amp;"),
            _ => output.push(ch),
        }
    }
}
