//! Lexical rewrites applied to raw text before it reaches the markdown parser. Nothing here
//! resolves links or checks existence.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;

use crate::{config::TransformOptions, links::is_external, paths::as_anchor};

/// Link title carried by wiki-links so the transform engine can tell them from authored links.
pub const WIKILINK_MARKER: &str = "trellis:wikilink";
/// As [`WIKILINK_MARKER`], for wiki-links that carried an explicit alias.
pub const WIKILINK_ALIASED_MARKER: &str = "trellis:wikilink:alias";
/// Image title carried by `![[...]]` embeds.
pub const EMBED_MARKER: &str = "trellis:embed";

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)%%.*?%%").expect("valid comment regex")
});

static CALLOUT_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^> *\[![\w-]+\|?.*?\][+-]?.*$").expect("valid callout line regex")
});

static TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\|[^\n]+\|\n\|(?: ?:?-{3,}:? ?\|)+\n(?:\|[^\n]+\|(?:\n|$))+",
    )
    .expect("valid table regex")
});

static TABLE_WIKILINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!?\[\[[^\]\n]*?\]\]").expect("valid table wikilink regex")
});

static WIKILINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<embed>!)?\[\[(?P<target>[^\[\]|#\\\n]+)?(?P<anchor>\\?#+[^\[\]|#\\\n]+)?(?P<alias>\\?\|[^\[\]#\n]*)?\]\]",
    )
    .expect("valid wikilink regex")
});

/// Run the preprocessing steps in order: comments, callout continuation lines, table escapes,
/// wiki-link normalization. Fenced code blocks are only touched by comment removal; a leading YAML
/// front matter block is passed through verbatim.
pub fn preprocess(raw: &str, options: &TransformOptions) -> String {
    let normalized = raw.replace("\r\n", "\n");
    let (frontmatter, body) = split_frontmatter(&normalized);
    let mut text = body.to_string();
    if options.comments {
        text = COMMENT_REGEX.replace_all(&text, "").into_owned();
    }

    let mut output = String::with_capacity(frontmatter.len() + text.len());
    output.push_str(frontmatter);
    for (fenced, segment) in split_fenced(&text) {
        if fenced {
            output.push_str(segment);
            continue;
        }
        let mut segment = segment.to_string();
        if options.callouts {
            segment = CALLOUT_LINE_REGEX
                .replace_all(&segment, "${0}\n> ")
                .into_owned();
        }
        if options.wikilinks {
            segment = escape_table_wikilinks(&segment);
            let spans = code_spans(&segment);
            segment = WIKILINK_REGEX
                .replace_all(&segment, |caps: &Captures| {
                    let start = caps.get(0).map_or(0, |m| m.start());
                    if spans.iter().any(|span| span.contains(&start)) {
                        caps[0].to_string()
                    } else {
                        rewrite_wikilink(caps, options)
                    }
                })
                .into_owned();
        }
        output.push_str(&segment);
    }
    output
}

/// Split off a leading `---` delimited block, closing delimiter included.
fn split_frontmatter(text: &str) -> (&str, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return ("", text);
    };
    let mut offset = 4;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" || line.trim_end() == "..." {
            return text.split_at(offset);
        }
    }
    ("", text)
}

/// Split text into `(inside_fence, segment)` runs. Fence lines belong to the fenced run.
fn split_fenced(text: &str) -> Vec<(bool, &str)> {
    let mut segments = Vec::new();
    let mut fence: Option<(char, usize)> = None;
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let indent = line.len() - line.trim_start_matches(' ').len();
        let trimmed = line.trim_start_matches(' ');
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~');
        let run = marker
            .map(|c| trimmed.chars().take_while(|x| *x == c).count())
            .unwrap_or(0);
        match (fence, marker) {
            (None, Some(c)) if indent <= 3 && run >= 3 => {
                if offset > start {
                    segments.push((false, &text[start..offset]));
                }
                start = offset;
                fence = Some((c, run));
            }
            (Some((open_char, open_run)), Some(c))
                if c == open_char && run >= open_run && trimmed[run..].trim().is_empty() =>
            {
                let end = offset + line.len();
                segments.push((true, &text[start..end]));
                start = end;
                fence = None;
            }
            _ => {}
        }
        offset += line.len();
    }
    if start < text.len() {
        segments.push((fence.is_some(), &text[start..]));
    }
    segments
}

/// Byte ranges of inline code spans. A run of n backticks opens a span that closes at the next
/// run of exactly n backticks; a span does not cross a blank line. An unmatched run is literal.
fn code_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let run_at = |i: usize| bytes[i..].iter().take_while(|b| **b == b'`').count();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open = run_at(i);
        let mut j = i + open;
        let mut close = None;
        while j < bytes.len() {
            if bytes[j] == b'`' {
                let run = run_at(j);
                if run == open {
                    close = Some(j + run);
                    break;
                }
                j += run;
            } else if bytes[j..].starts_with(b"\n\n") {
                break;
            } else {
                j += 1;
            }
        }
        match close {
            Some(end) => {
                spans.push(i..end);
                i = end;
            }
            None => i += open,
        }
    }
    spans
}

/// Escape `|` and `#` inside wiki-links that sit in a pipe table, so the table grid does not split
/// on them.
fn escape_table_wikilinks(text: &str) -> String {
    TABLE_REGEX
        .replace_all(text, |table: &Captures| {
            TABLE_WIKILINK_REGEX
                .replace_all(&table[0], |link: &Captures| {
                    let mut escaped = String::with_capacity(link[0].len() + 4);
                    let mut prev = '\0';
                    for c in link[0].chars() {
                        if (c == '|' || c == '#') && prev != '\\' {
                            escaped.push('\\');
                        }
                        escaped.push(c);
                        prev = c;
                    }
                    escaped
                })
                .into_owned()
        })
        .into_owned()
}

fn rewrite_wikilink(caps: &Captures, options: &TransformOptions) -> String {
    let whole = &caps[0];
    let embed = caps.name("embed").is_some();
    let target = caps.name("target").map(|m| m.as_str().trim()).unwrap_or("");
    let anchor_text = caps
        .name("anchor")
        .map(|m| m.as_str().trim_start_matches('\\').trim_start_matches('#').trim())
        .unwrap_or("");
    let alias = caps
        .name("alias")
        .map(|m| {
            let raw = m.as_str();
            let raw = raw.strip_prefix('\\').unwrap_or(raw);
            let raw = raw.strip_prefix('|').unwrap_or(raw);
            raw.replace("\\|", "|").trim().to_string()
        })
        .filter(|alias| !alias.is_empty());
    if target.is_empty() && anchor_text.is_empty() {
        return whole.to_string();
    }

    let display = match &alias {
        Some(alias) => alias.clone(),
        None if target.is_empty() => anchor_text.to_string(),
        None => target.to_string(),
    };
    let bang = if embed { "!" } else { "" };

    if is_external(target) {
        return match embed {
            true => format!(
                "![{}](<{}> \"{EMBED_MARKER}\")",
                escape_text(&display),
                escape_destination(target)
            ),
            false => format!("[{}](<{}>)", escape_text(&display), escape_destination(target)),
        };
    }

    let anchor = if anchor_text.starts_with('^') && options.parse_block_references {
        format!("#{anchor_text}")
    } else {
        as_anchor(anchor_text)
    };
    let marker = match (embed, alias.is_some()) {
        (true, _) => EMBED_MARKER,
        (false, true) => WIKILINK_ALIASED_MARKER,
        (false, false) => WIKILINK_MARKER,
    };
    format!(
        "{bang}[{}](<{}{}> \"{marker}\")",
        escape_text(&display),
        escape_destination(target),
        anchor
    )
}

/// Backslash-escape markdown punctuation so link text renders literally.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '|' | '~' | '$' | '&' | '='
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_destination(dest: &str) -> String {
    let mut escaped = String::with_capacity(dest.len());
    for c in dest.chars() {
        if matches!(c, '\\' | '<' | '>') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
