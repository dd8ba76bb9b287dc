//! The tree the transform passes rewrite. Markdown structure the engine does not care about stays
//! as raw pulldown-cmark tags and events; everything the engine produces gets its own variant.
use pulldown_cmark::{
    CowStr, Event as MdEvent, Options, Parser as MdParser, Tag as MdTag, TagEnd as MdTagEnd,
};
use serde::{Deserialize, Serialize};

use crate::links::ResolvedLink;

pub fn trellis_md_options() -> Options {
    let mut md_options = Options::empty();
    // Enabled explicitly for reproducibility. GFM alerts and native wiki-links stay off: callouts
    // and wiki-links have their own grammar here.
    md_options.insert(Options::ENABLE_FOOTNOTES);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
    md_options
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A markdown container left as parsed.
    Container {
        tag: MdTag<'static>,
        end: MdTagEnd,
        children: Vec<Node>,
    },
    /// A markdown leaf event left as parsed: text, code, html, breaks, rules.
    Leaf(MdEvent<'static>),
    Link(LinkNode),
    Embed(Embed),
    Highlight(String),
    Tag(TagNode),
    Callout(Callout),
    Diagram(Diagram),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOrigin {
    Markdown,
    WikiLink { aliased: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkNode {
    pub destination: String,
    /// Authored link title, never a wiki-link marker.
    pub title: Option<String>,
    pub children: Vec<Node>,
    pub origin: LinkOrigin,
    /// Render as a disabled link.
    pub broken: bool,
    pub resolved: Option<ResolvedLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Embed {
    Image {
        src: String,
        alt: String,
        width: Option<u32>,
        height: Option<u32>,
    },
    Video {
        src: String,
    },
    Audio {
        src: String,
    },
    Pdf {
        src: String,
    },
    YouTube {
        src: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagNode {
    /// Slugified form, as stored in the document tag set.
    pub slug: String,
    /// Token as written, without the leading `#`.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fold {
    Expanded,
    Collapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Callout {
    /// Canonical kind after synonym folding.
    pub kind: String,
    pub metadata: Option<String>,
    /// `None` when the callout is not collapsible.
    pub fold: Option<Fold>,
    pub title: Vec<Node>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    pub language: String,
    pub source: String,
}

impl Node {
    pub fn text<S: Into<String>>(text: S) -> Node {
        Node::Leaf(MdEvent::Text(CowStr::from(text.into())))
    }

    pub fn paragraph(children: Vec<Node>) -> Node {
        Node::Container {
            tag: MdTag::Paragraph,
            end: MdTagEnd::Paragraph,
            children,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Node::Leaf(MdEvent::Text(text)) => Some(&**text),
            _ => None,
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, Node::Leaf(MdEvent::SoftBreak | MdEvent::HardBreak))
    }
}

/// Parse preprocessed markdown into a [`Node`] forest. Adjacent text events are merged so inline
/// rules see whole runs of text.
pub fn parse(text: &str) -> Vec<Node> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<(MdTag<'static>, Vec<Node>)> = Vec::new();
    for event in MdParser::new_ext(text, trellis_md_options()) {
        match event {
            MdEvent::Start(tag) => stack.push((tag.into_static(), Vec::new())),
            MdEvent::End(end) => {
                let Some((tag, children)) = stack.pop() else {
                    tracing::warn!("[ast::parse] unbalanced end tag {end:?}, ignoring");
                    continue;
                };
                let siblings = match stack.last_mut() {
                    Some((_, children)) => children,
                    None => &mut root,
                };
                push_node(siblings, Node::Container { tag, end, children });
            }
            other => {
                let siblings = match stack.last_mut() {
                    Some((_, children)) => children,
                    None => &mut root,
                };
                push_node(siblings, Node::Leaf(other.into_static()));
            }
        }
    }
    // The parser always balances its tags; keep content if it ever does not.
    while let Some((_, children)) = stack.pop() {
        let siblings = match stack.last_mut() {
            Some((_, parent)) => parent,
            None => &mut root,
        };
        for child in children {
            push_node(siblings, child);
        }
    }
    root
}

/// Append `node`, merging it into a preceding text leaf when both are text.
pub fn push_node(siblings: &mut Vec<Node>, node: Node) {
    if let Node::Leaf(MdEvent::Text(text)) = &node {
        if let Some(Node::Leaf(MdEvent::Text(prev))) = siblings.last_mut() {
            let mut merged = String::from(&**prev);
            merged.push_str(text);
            *prev = CowStr::from(merged);
            return;
        }
    }
    siblings.push(node);
}

/// Plain text of a node forest, for excerpts, word counts and alt text.
pub fn plain_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Container { tag, children, .. } => {
                if matches!(tag, MdTag::MetadataBlock(_)) {
                    continue;
                }
                collect_text(children, out);
                if matches!(
                    tag,
                    MdTag::Paragraph | MdTag::Heading { .. } | MdTag::Item | MdTag::CodeBlock(_)
                ) {
                    out.push(' ');
                }
            }
            Node::Leaf(MdEvent::Text(text) | MdEvent::Code(text)) => out.push_str(text),
            Node::Leaf(MdEvent::SoftBreak | MdEvent::HardBreak) => out.push(' '),
            Node::Leaf(_) => {}
            Node::Link(link) => collect_text(&link.children, out),
            Node::Highlight(text) => out.push_str(text),
            Node::Tag(tag) => {
                out.push('#');
                out.push_str(&tag.text);
            }
            Node::Callout(callout) => {
                collect_text(&callout.title, out);
                out.push(' ');
                collect_text(&callout.body, out);
            }
            Node::Embed(_) | Node::Diagram(_) => {}
        }
    }
}
