//! The inline transform engine: an ordered list of passes over one [`Node`] forest. Text-level
//! rewrites are driven by a rule table of `(pattern, rewriter)` pairs; wiki-links, link
//! resolution, callouts and diagrams get dedicated passes.
use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, Event as MdEvent, Tag as MdTag};
use regex::{Captures, Regex};
use std::collections::HashSet;
use titlecase::titlecase;
use url::Url;

use crate::{
    codec::{
        ast::{plain_text, push_node, Callout, Diagram, Embed, Fold, LinkNode, LinkOrigin, Node, TagNode},
        preprocess::{EMBED_MARKER, WIKILINK_ALIASED_MARKER, WIKILINK_MARKER},
    },
    config::{LinkOptions, TransformOptions},
    links::{resolve, CorpusSlugs, LinkClass, ResolvedLink},
    paths::{slug_tag, split_anchor, SlugPath},
    properties::{EdgeKind, OutgoingLink},
};

pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "svg", "webp"];
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "webm", "ogv", "mov", "mkv"];
pub const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "webm", "wav", "m4a", "ogg", "3gp", "flac"];

/// Callout kind synonyms, folded onto their canonical kind. Unknown kinds pass through lowercased.
pub const CALLOUT_SYNONYMS: [(&str, &str); 27] = [
    ("note", "note"),
    ("abstract", "abstract"),
    ("summary", "abstract"),
    ("tldr", "abstract"),
    ("info", "info"),
    ("todo", "todo"),
    ("tip", "tip"),
    ("hint", "tip"),
    ("important", "tip"),
    ("success", "success"),
    ("check", "success"),
    ("done", "success"),
    ("question", "question"),
    ("help", "question"),
    ("faq", "question"),
    ("warning", "warning"),
    ("attention", "warning"),
    ("caution", "warning"),
    ("failure", "failure"),
    ("missing", "failure"),
    ("fail", "failure"),
    ("danger", "danger"),
    ("error", "danger"),
    ("bug", "bug"),
    ("example", "example"),
    ("quote", "quote"),
    ("cite", "quote"),
];

/// ASCII arrow tokens and their glyphs.
pub const ARROW_GLYPHS: [(&str, &str); 8] = [
    ("->", "\u{2192}"),
    ("-->", "\u{21D2}"),
    ("=>", "\u{21D2}"),
    ("==>", "\u{21D2}"),
    ("<-", "\u{2190}"),
    ("<--", "\u{21D0}"),
    ("<=", "\u{21D0}"),
    ("<==", "\u{21D0}"),
];

static HIGHLIGHT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"==([^=]+)==").expect("valid highlight regex")
});

static ARROW_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-{1,2}>|={1,2}>|<-{1,2}|<={1,2})").expect("valid arrow regex")
});

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<lead>^|\s)#(?P<tag>[\w-]+(?:/[\w-]+)*)").expect("valid tag regex")
});

static NUMERIC_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[/\d]+$").expect("valid numeric tag regex")
});

static CALLOUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[!(?P<kind>[\w-]+)(?:\|(?P<meta>[^\]]*))?\](?P<fold>[+-]?)",
    )
    .expect("valid callout regex")
});

/// Running state of one transformation: the inputs every pass reads and the side outputs
/// (tags, outgoing links) the passes collect.
pub struct TransformContext<'a> {
    pub options: &'a TransformOptions,
    pub link_options: &'a LinkOptions,
    pub source_slug: &'a str,
    pub corpus: &'a CorpusSlugs,
    pub has_diagram: bool,
    tags: Vec<String>,
    links: Vec<OutgoingLink>,
    seen_tags: HashSet<String>,
    seen_links: HashSet<OutgoingLink>,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        options: &'a TransformOptions,
        link_options: &'a LinkOptions,
        source_slug: &'a str,
        corpus: &'a CorpusSlugs,
    ) -> TransformContext<'a> {
        TransformContext {
            options,
            link_options,
            source_slug,
            corpus,
            has_diagram: false,
            tags: Vec::new(),
            links: Vec::new(),
            seen_tags: HashSet::new(),
            seen_links: HashSet::new(),
        }
    }

    /// Add a tag to the document tag set. Returns the slug when it was accepted.
    pub fn add_tag(&mut self, raw: &str) -> Option<String> {
        let slug = slug_tag(raw);
        if slug.is_empty() {
            return None;
        }
        if self.seen_tags.insert(slug.clone()) {
            self.tags.push(slug.clone());
        }
        Some(slug)
    }

    pub fn add_link(&mut self, link: OutgoingLink) {
        if self.seen_links.insert(link.clone()) {
            self.links.push(link);
        }
    }

    pub fn resolve(&self, target: &str) -> ResolvedLink {
        resolve(self.source_slug, target, self.link_options, self.corpus)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn links(&self) -> &[OutgoingLink] {
        &self.links
    }

    pub fn into_outputs(self) -> (Vec<String>, Vec<OutgoingLink>, bool) {
        (self.tags, self.links, self.has_diagram)
    }
}

type Pass = fn(Vec<Node>, &mut TransformContext) -> Vec<Node>;

/// Passes in evaluation order.
pub const PASSES: [(&str, Pass); 5] = [
    ("wikilinks", wikilink_pass),
    ("inline", inline_pass),
    ("links", link_pass),
    ("callouts", callout_pass),
    ("diagrams", diagram_pass),
];

pub fn transform(mut nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    for (name, pass) in PASSES {
        tracing::trace!("[transform] running pass '{name}' on '{}'", ctx.source_slug);
        nodes = pass(nodes, ctx);
    }
    nodes
}

type Rewriter = fn(&Captures, &mut TransformContext) -> Option<Vec<Node>>;

struct InlineRule {
    name: &'static str,
    enabled: fn(&TransformOptions) -> bool,
    pattern: &'static Lazy<Regex>,
    rewrite: Rewriter,
}

static INLINE_RULES: [InlineRule; 3] = [
    InlineRule {
        name: "highlight",
        enabled: |opts| opts.highlight,
        pattern: &HIGHLIGHT_REGEX,
        rewrite: rewrite_highlight,
    },
    InlineRule {
        name: "arrows",
        enabled: |opts| opts.parse_arrows,
        pattern: &ARROW_REGEX,
        rewrite: rewrite_arrow,
    },
    InlineRule {
        name: "tags",
        enabled: |opts| opts.parse_tags,
        pattern: &TAG_REGEX,
        rewrite: rewrite_tag,
    },
];

fn rewrite_highlight(caps: &Captures, _ctx: &mut TransformContext) -> Option<Vec<Node>> {
    Some(vec![Node::Highlight(caps[1].to_string())])
}

fn rewrite_arrow(caps: &Captures, _ctx: &mut TransformContext) -> Option<Vec<Node>> {
    ARROW_GLYPHS
        .iter()
        .find(|(token, _)| *token == &caps[0])
        .map(|(_, glyph)| vec![Node::text(*glyph)])
}

fn rewrite_tag(caps: &Captures, ctx: &mut TransformContext) -> Option<Vec<Node>> {
    let raw = &caps["tag"];
    if NUMERIC_TAG_REGEX.is_match(raw) {
        return None;
    }
    let slug = ctx.add_tag(raw)?;
    let mut nodes = Vec::new();
    if !caps["lead"].is_empty() {
        nodes.push(Node::text(&caps["lead"]));
    }
    nodes.push(Node::Tag(TagNode {
        slug,
        text: raw.to_string(),
    }));
    Some(nodes)
}

fn inline_pass(nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    let mut nodes = nodes;
    for rule in INLINE_RULES.iter() {
        if !(rule.enabled)(ctx.options) {
            continue;
        }
        tracing::trace!("[transform] inline rule '{}'", rule.name);
        nodes = map_text(
            nodes,
            true,
            &mut |text: String, boundary: bool, ctx: &mut TransformContext| {
                apply_rule(text, boundary, rule, ctx)
            },
            ctx,
        );
    }
    nodes
}

/// Split `text` around every match of the rule; matches the rewriter declines stay literal.
///
/// `boundary` is false when the leaf directly follows an inline node (a link, code span,
/// emphasis, highlight); an empty `lead` capture at the start of such a leaf is not a boundary.
fn apply_rule(
    text: String,
    boundary: bool,
    rule: &InlineRule,
    ctx: &mut TransformContext,
) -> Vec<Node> {
    let regex: &Regex = rule.pattern;
    let mut out = Vec::new();
    let mut last = 0;
    for caps in regex.captures_iter(&text) {
        let Some(whole) = caps.get(0) else { continue };
        if !boundary && caps.name("lead").is_some_and(|lead| lead.as_str().is_empty()) {
            continue;
        }
        if let Some(replacement) = (rule.rewrite)(&caps, ctx) {
            if whole.start() > last {
                push_node(&mut out, Node::text(&text[last..whole.start()]));
            }
            for node in replacement {
                push_node(&mut out, node);
            }
            last = whole.end();
        }
    }
    if last == 0 {
        return vec![Node::text(text)];
    }
    if last < text.len() {
        push_node(&mut out, Node::text(&text[last..]));
    }
    out
}

/// Rebuild the forest, handing every eligible text leaf to `f`. Code, raw html, metadata and link
/// text are not eligible.
///
/// Each leaf is handed over with a boundary flag: true at the start of a block, after a line
/// break, or after text ending in whitespace. `boundary` is the flag for the first node.
fn map_text(
    nodes: Vec<Node>,
    boundary: bool,
    f: &mut dyn FnMut(String, bool, &mut TransformContext) -> Vec<Node>,
    ctx: &mut TransformContext,
) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut boundary = boundary;
    for node in nodes {
        match node {
            Node::Leaf(MdEvent::Text(text)) => {
                let next = text.ends_with(char::is_whitespace);
                for produced in f(text.to_string(), boundary, ctx) {
                    push_node(&mut out, produced);
                }
                boundary = next;
            }
            Node::Leaf(event @ (MdEvent::SoftBreak | MdEvent::HardBreak)) => {
                out.push(Node::Leaf(event));
                boundary = true;
            }
            Node::Container { tag, end, children } => {
                let inline = is_inline_container(&tag);
                let children = if skips_inline_rules(&tag) {
                    children
                } else {
                    map_text(children, !inline || boundary, f, ctx)
                };
                out.push(Node::Container { tag, end, children });
                boundary = !inline;
            }
            Node::Callout(mut callout) => {
                callout.title = map_text(callout.title, true, f, ctx);
                callout.body = map_text(callout.body, true, f, ctx);
                out.push(Node::Callout(callout));
                boundary = true;
            }
            other => {
                out.push(other);
                boundary = false;
            }
        }
    }
    out
}

fn is_inline_container(tag: &MdTag) -> bool {
    matches!(
        tag,
        MdTag::Emphasis
            | MdTag::Strong
            | MdTag::Strikethrough
            | MdTag::Link { .. }
            | MdTag::Image { .. }
    )
}

fn skips_inline_rules(tag: &MdTag) -> bool {
    matches!(
        tag,
        MdTag::CodeBlock(_)
            | MdTag::HtmlBlock
            | MdTag::MetadataBlock(_)
            | MdTag::Link { .. }
            | MdTag::Image { .. }
    )
}

/// Turn markdown link and image containers into [`LinkNode`]s and embeds. Wiki-links are
/// resolved here so the broken-link variant can be chosen; authored links are left for
/// [`link_pass`].
fn wikilink_pass(nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let rewritten = match node {
            Node::Container {
                tag:
                    MdTag::Link {
                        dest_url, title, ..
                    },
                children,
                ..
            } => {
                let children = wikilink_pass(children, ctx);
                Node::Link(wikilink_node(&dest_url, &title, children, ctx))
            }
            Node::Container {
                tag:
                    MdTag::Image {
                        link_type,
                        dest_url,
                        title,
                        id,
                    },
                end,
                children,
            } => {
                if &*title == EMBED_MARKER && ctx.options.wikilinks {
                    embed_node(&dest_url, &children, ctx)
                } else if let Some(src) = ctx
                    .options
                    .enable_youtube_embed
                    .then(|| youtube_embed_url(&dest_url))
                    .flatten()
                {
                    Node::Embed(Embed::YouTube { src })
                } else {
                    Node::Container {
                        tag: MdTag::Image {
                            link_type,
                            dest_url,
                            title,
                            id,
                        },
                        end,
                        children,
                    }
                }
            }
            Node::Container { tag, end, children } => Node::Container {
                tag,
                end,
                children: wikilink_pass(children, ctx),
            },
            other => other,
        };
        out.push(rewritten);
    }
    out
}

fn wikilink_node(
    dest_url: &str,
    title: &str,
    children: Vec<Node>,
    ctx: &mut TransformContext,
) -> LinkNode {
    let origin = match title {
        WIKILINK_MARKER => LinkOrigin::WikiLink { aliased: false },
        WIKILINK_ALIASED_MARKER => LinkOrigin::WikiLink { aliased: true },
        _ => LinkOrigin::Markdown,
    };
    let mut link = LinkNode {
        destination: dest_url.to_string(),
        title: (origin == LinkOrigin::Markdown && !title.is_empty()).then(|| title.to_string()),
        children,
        origin,
        broken: false,
        resolved: None,
    };
    if origin != LinkOrigin::Markdown {
        let resolved = ctx.resolve(dest_url);
        link.broken = ctx.options.disable_broken_links
            && resolved.class == LinkClass::Internal
            && !resolved.exists;
        link.resolved = Some(resolved);
    }
    link
}

fn embed_node(dest_url: &str, children: &[Node], ctx: &mut TransformContext) -> Node {
    let alias = plain_text(children);
    if ctx.options.enable_youtube_embed {
        if let Some(src) = youtube_embed_url(dest_url) {
            return Node::Embed(Embed::YouTube { src });
        }
    }
    let (path, _) = split_anchor(dest_url);
    let ext = SlugPath::new(path).ext().to_lowercase();
    let resolved = ctx.resolve(dest_url);
    let src = resolved.href();
    let media = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        let (alt, width, height) = parse_image_alias(&alias, path);
        Some(Embed::Image {
            src,
            alt,
            width,
            height,
        })
    } else if ctx.options.enable_video_embed && VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(Embed::Video { src })
    } else if ctx.options.enable_video_embed && AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(Embed::Audio { src })
    } else if ext == "pdf" {
        Some(Embed::Pdf { src })
    } else {
        None
    };

    match media {
        Some(embed) => {
            if resolved.is_internal() {
                ctx.add_link(OutgoingLink {
                    target: resolved.target.clone(),
                    kind: EdgeKind::Embed,
                    exists: resolved.exists,
                });
            }
            Node::Embed(embed)
        }
        None => {
            // Not media: degrade to an ordinary wiki-link.
            let aliased = alias.trim() != path.trim();
            let mut link = wikilink_node(dest_url, WIKILINK_MARKER, vec![Node::text(alias)], ctx);
            link.origin = LinkOrigin::WikiLink { aliased };
            Node::Link(link)
        }
    }
}

/// Parse the `alt|WIDTHxHEIGHT` alias grammar of image embeds. Every part is optional; an alias
/// that is only dimensions leaves the alt text empty.
pub fn parse_image_alias(alias: &str, target: &str) -> (String, Option<u32>, Option<u32>) {
    let alias = alias.trim();
    if alias == target.trim() {
        return (String::new(), None, None);
    }
    let (alt, dims) = match alias.rsplit_once('|') {
        Some((alt, dims)) => (alt.trim(), dims.trim()),
        None => ("", alias),
    };
    match parse_dimensions(dims) {
        Some((width, height)) => (alt.to_string(), Some(width), height),
        None => (alias.to_string(), None, None),
    }
}

fn parse_dimensions(dims: &str) -> Option<(u32, Option<u32>)> {
    let (width, height) = match dims.split_once('x') {
        Some((width, height)) => (width, Some(height)),
        None => (dims, None),
    };
    let width = width.parse::<u32>().ok()?;
    let height = match height {
        Some(height) => Some(height.parse::<u32>().ok()?),
        None => None,
    };
    Some((width, height))
}

/// Privacy-friendly embed URL for YouTube watch/short links.
pub fn youtube_embed_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.");
    let video_id = match host {
        "youtube.com" | "m.youtube.com" => parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned()),
        "youtu.be" => parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string),
        _ => None,
    }?;
    if video_id.is_empty() {
        return None;
    }
    Some(format!("https://www.youtube-nocookie.com/embed/{video_id}"))
}

/// Resolve remaining links, collect the outgoing link set and apply pretty link text.
fn link_pass(nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let rewritten = match node {
            Node::Link(mut link) => {
                let resolved = match link.resolved.take() {
                    Some(resolved) => resolved,
                    None => ctx.resolve(&link.destination),
                };
                match resolved.class {
                    LinkClass::Internal => ctx.add_link(OutgoingLink {
                        target: resolved.target.clone(),
                        kind: EdgeKind::Internal,
                        exists: resolved.exists,
                    }),
                    LinkClass::External => ctx.add_link(OutgoingLink {
                        target: resolved.target.clone(),
                        kind: EdgeKind::External,
                        exists: true,
                    }),
                    LinkClass::Anchor => {}
                }
                if ctx.link_options.pretty_links
                    && resolved.is_internal()
                    && link.origin == (LinkOrigin::WikiLink { aliased: false })
                {
                    prettify(&mut link.children);
                }
                link.resolved = Some(resolved);
                link.children = link_pass(link.children, ctx);
                Node::Link(link)
            }
            Node::Container { tag, end, children } => Node::Container {
                tag,
                end,
                children: link_pass(children, ctx),
            },
            Node::Callout(mut callout) => {
                callout.title = link_pass(callout.title, ctx);
                callout.body = link_pass(callout.body, ctx);
                Node::Callout(callout)
            }
            other => other,
        };
        out.push(rewritten);
    }
    out
}

/// Show only the last path segment of a single-text link label.
fn prettify(children: &mut [Node]) {
    let [only] = children else {
        return;
    };
    let pretty = only
        .as_text()
        .filter(|text| !text.starts_with('#'))
        .and_then(|text| text.rsplit_once('/'))
        .map(|(_, basename)| basename.to_string())
        .filter(|basename| !basename.is_empty());
    if let Some(basename) = pretty {
        *only = Node::text(basename);
    }
}

pub fn canonical_callout_kind(kind: &str) -> String {
    let lowered = kind.to_lowercase();
    CALLOUT_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

fn callout_pass(nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    if !ctx.options.callouts {
        return nodes;
    }
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let rewritten = match node {
            Node::Container {
                tag: MdTag::BlockQuote(kind),
                end,
                children,
            } => match try_callout(children, ctx) {
                Ok(callout) => Node::Callout(callout),
                Err(children) => Node::Container {
                    tag: MdTag::BlockQuote(kind),
                    end,
                    children: callout_pass(children, ctx),
                },
            },
            Node::Container { tag, end, children } => Node::Container {
                tag,
                end,
                children: callout_pass(children, ctx),
            },
            other => other,
        };
        out.push(rewritten);
    }
    out
}

/// Restructure a blockquote into a callout, or hand its children back untouched.
fn try_callout(children: Vec<Node>, ctx: &mut TransformContext) -> Result<Callout, Vec<Node>> {
    let header = match children.first() {
        Some(Node::Container {
            tag: MdTag::Paragraph,
            children: para,
            ..
        }) => para.first().and_then(Node::as_text).and_then(|text| {
            CALLOUT_REGEX.captures(text).map(|caps| {
                let kind = caps["kind"].to_string();
                let meta = caps
                    .name("meta")
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|m| !m.is_empty());
                let fold = match &caps["fold"] {
                    "+" => Some(Fold::Expanded),
                    "-" => Some(Fold::Collapsed),
                    _ => None,
                };
                let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
                (kind, meta, fold, text[consumed..].to_string())
            })
        }),
        _ => None,
    };
    let Some((raw_kind, metadata, fold, title_rest)) = header else {
        return Err(children);
    };

    let mut blocks = children.into_iter();
    let first_para = match blocks.next() {
        Some(Node::Container { children, .. }) => children,
        _ => Vec::new(),
    };
    let mut inline = first_para.into_iter().skip(1);

    let mut title = Vec::new();
    let title_text = title_rest.trim_start();
    if !title_text.is_empty() {
        title.push(Node::text(title_text.to_string()));
    }
    let mut remainder = Vec::new();
    for node in inline.by_ref() {
        if node.is_break() {
            break;
        }
        push_node(&mut title, node);
    }
    for node in inline {
        push_node(&mut remainder, node);
    }
    if let Some(Node::Leaf(MdEvent::Text(text))) = title.last_mut() {
        let trimmed = text.trim_end().to_string();
        *text = trimmed.into();
    }
    title.retain(|node| node.as_text() != Some(""));

    let kind = canonical_callout_kind(&raw_kind);
    if title.is_empty() {
        title.push(Node::text(titlecase(&kind.replace('-', " "))));
    }

    let mut body = Vec::new();
    if !remainder.is_empty() {
        body.push(Node::paragraph(remainder));
    }
    body.extend(blocks);
    let body = callout_pass(body, ctx);

    Ok(Callout {
        kind,
        metadata,
        fold,
        title,
        body,
    })
}

fn diagram_pass(nodes: Vec<Node>, ctx: &mut TransformContext) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let rewritten = match node {
            Node::Container {
                tag: MdTag::CodeBlock(CodeBlockKind::Fenced(info)),
                end,
                children,
            } => {
                let language = info.split_whitespace().next().unwrap_or("").to_string();
                if ctx.options.is_diagram_language(&language) {
                    ctx.has_diagram = true;
                    Node::Diagram(Diagram {
                        language,
                        source: plain_source(&children),
                    })
                } else {
                    Node::Container {
                        tag: MdTag::CodeBlock(CodeBlockKind::Fenced(info)),
                        end,
                        children,
                    }
                }
            }
            Node::Container { tag, end, children } => Node::Container {
                tag,
                end,
                children: diagram_pass(children, ctx),
            },
            Node::Callout(mut callout) => {
                callout.body = diagram_pass(callout.body, ctx);
                Node::Callout(callout)
            }
            other => other,
        };
        out.push(rewritten);
    }
    out
}

fn plain_source(children: &[Node]) -> String {
    children
        .iter()
        .filter_map(Node::as_text)
        .collect::<Vec<_>>()
        .concat()
}
