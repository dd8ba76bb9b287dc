//! Render adapter: flatten a transformed [`Node`] forest back into pulldown-cmark events and let
//! `pulldown_cmark::html` serialize them. Engine-specific nodes are emitted as raw html events.
use pulldown_cmark::{CowStr, Event as MdEvent};
use std::fmt::Write;

use crate::{
    codec::ast::{Callout, Diagram, Embed, Fold, LinkNode, LinkOrigin, Node, TagNode},
    config::{LinkOptions, TransformOptions},
    error::TrellisError,
    links::LinkClass,
};

const EXTERNAL_ICON: &str = r#"<svg aria-hidden="true" class="external-icon" style="max-width:0.8em;max-height:0.8em" viewBox="0 0 512 512"><path d="M320 0H288V64h32 82.7L201.4 265.4 178.7 288 224 333.3l22.6-22.6L448 109.3V192v32h64V192 32 0H480 320zM32 32H0V64 480v32H32 456h32V480 352 320H424v32 96H64V96h96 32V32H160 32z"></path></svg>"#;

pub fn render_html(
    nodes: &[Node],
    options: &TransformOptions,
    link_options: &LinkOptions,
) -> Result<String, TrellisError> {
    let mut events = Vec::new();
    flatten(nodes, options, link_options, &mut events)?;
    let mut output = String::new();
    pulldown_cmark::html::write_html_fmt(&mut output, events.into_iter())?;
    Ok(output)
}

/// Escape a value for use inside a double-quoted html attribute.
pub fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn inline_html(html: String) -> MdEvent<'static> {
    MdEvent::InlineHtml(CowStr::from(html))
}

fn block_html(html: String) -> MdEvent<'static> {
    MdEvent::Html(CowStr::from(html))
}

fn flatten(
    nodes: &[Node],
    options: &TransformOptions,
    link_options: &LinkOptions,
    events: &mut Vec<MdEvent<'static>>,
) -> Result<(), TrellisError> {
    for node in nodes {
        match node {
            Node::Container { tag, end, children } => {
                events.push(MdEvent::Start(tag.clone()));
                flatten(children, options, link_options, events)?;
                events.push(MdEvent::End(*end));
            }
            Node::Leaf(event) => events.push(event.clone()),
            Node::Link(link) => render_link(link, options, link_options, events)?,
            Node::Embed(embed) => events.push(inline_html(embed_html(embed, options))),
            Node::Highlight(text) => {
                events.push(inline_html("<span class=\"text-highlight\">".to_string()));
                events.push(MdEvent::Text(CowStr::from(text.clone())));
                events.push(inline_html("</span>".to_string()));
            }
            Node::Tag(tag) => render_tag(tag, options, events),
            Node::Callout(callout) => render_callout(callout, options, link_options, events)?,
            Node::Diagram(diagram) => render_diagram(diagram, events)?,
        }
    }
    Ok(())
}

fn render_link(
    link: &LinkNode,
    options: &TransformOptions,
    link_options: &LinkOptions,
    events: &mut Vec<MdEvent<'static>>,
) -> Result<(), TrellisError> {
    let mut open = String::from("<a");
    let mut external = false;
    match &link.resolved {
        Some(resolved) => {
            let mut classes = match resolved.class {
                LinkClass::External => vec!["external"],
                LinkClass::Anchor => vec!["internal", "same-page-link"],
                LinkClass::Internal => vec!["internal"],
            };
            if link.broken {
                classes.push("broken");
            }
            if link.origin == (LinkOrigin::WikiLink { aliased: true }) {
                classes.push("alias");
            }
            if !link.broken {
                write!(open, " href=\"{}\"", escape_attr(&resolved.href()))?;
            }
            write!(open, " class=\"{}\"", classes.join(" "))?;
            if resolved.is_internal() {
                write!(open, " data-slug=\"{}\"", escape_attr(&resolved.target))?;
            }
            if resolved.class == LinkClass::External {
                external = true;
                if link_options.open_links_in_new_tab {
                    open.push_str(" target=\"_blank\" rel=\"noopener noreferrer\"");
                }
            }
        }
        None => {
            write!(open, " href=\"{}\"", escape_attr(&link.destination))?;
        }
    }
    if let Some(title) = &link.title {
        write!(open, " title=\"{}\"", escape_attr(title))?;
    }
    open.push('>');

    events.push(inline_html(open));
    flatten(&link.children, options, link_options, events)?;
    if external && link_options.external_link_icon {
        events.push(inline_html(EXTERNAL_ICON.to_string()));
    }
    events.push(inline_html("</a>".to_string()));
    Ok(())
}

fn render_tag(tag: &TagNode, options: &TransformOptions, events: &mut Vec<MdEvent<'static>>) {
    let base = options.tag_index_base.trim_end_matches('/');
    events.push(inline_html(format!(
        "<a href=\"{}/{}\" class=\"internal tag-link\">",
        escape_attr(base),
        escape_attr(&tag.slug)
    )));
    events.push(MdEvent::Text(CowStr::from(format!("#{}", tag.text))));
    events.push(inline_html("</a>".to_string()));
}

fn embed_html(embed: &Embed, options: &TransformOptions) -> String {
    match embed {
        Embed::Image {
            src,
            alt,
            width,
            height,
        } => {
            let dimension = |value: &Option<u32>| {
                value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "auto".to_string())
            };
            let loading = if options.lazy_load {
                " loading=\"lazy\""
            } else {
                ""
            };
            format!(
                "<img src=\"{}\" alt=\"{}\" width=\"{}\" height=\"{}\"{loading}>",
                escape_attr(src),
                escape_attr(alt),
                dimension(width),
                dimension(height)
            )
        }
        Embed::Video { src } => format!("<video src=\"{}\" controls></video>", escape_attr(src)),
        Embed::Audio { src } => format!("<audio src=\"{}\" controls></audio>", escape_attr(src)),
        Embed::Pdf { src } => format!("<iframe src=\"{}\" class=\"pdf\"></iframe>", escape_attr(src)),
        Embed::YouTube { src } => format!(
            "<iframe class=\"external-embed youtube\" allow=\"fullscreen\" frameborder=\"0\" width=\"600px\" src=\"{}\"></iframe>",
            escape_attr(src)
        ),
    }
}

fn render_callout(
    callout: &Callout,
    options: &TransformOptions,
    link_options: &LinkOptions,
    events: &mut Vec<MdEvent<'static>>,
) -> Result<(), TrellisError> {
    let kind = escape_attr(&callout.kind);
    let mut classes = format!("callout {kind}");
    if callout.fold.is_some() {
        classes.push_str(" is-collapsible");
    }
    if callout.fold == Some(Fold::Collapsed) {
        classes.push_str(" is-collapsed");
    }
    let mut open = format!("<blockquote class=\"{classes}\" data-callout=\"{kind}\"");
    if let Some(fold) = callout.fold {
        let state = match fold {
            Fold::Expanded => "expanded",
            Fold::Collapsed => "collapsed",
        };
        write!(open, " data-callout-fold=\"{state}\"")?;
    }
    if let Some(metadata) = &callout.metadata {
        write!(open, " data-callout-metadata=\"{}\"", escape_attr(metadata))?;
    }
    open.push_str(">\n<div class=\"callout-title\">\n<div class=\"callout-icon\"></div>\n");
    open.push_str("<div class=\"callout-title-inner\"><p>");
    events.push(block_html(open));

    flatten(&callout.title, options, link_options, events)?;

    let mut close_title = String::from("</p></div>\n");
    if callout.fold.is_some() {
        close_title.push_str("<div class=\"fold-callout-icon\"></div>\n");
    }
    close_title.push_str("</div>\n");
    if !callout.body.is_empty() {
        close_title.push_str("<div class=\"callout-content\">\n");
    }
    events.push(block_html(close_title));

    if !callout.body.is_empty() {
        flatten(&callout.body, options, link_options, events)?;
        events.push(block_html("</div>\n".to_string()));
    }
    events.push(block_html("</blockquote>\n".to_string()));
    Ok(())
}

fn render_diagram(diagram: &Diagram, events: &mut Vec<MdEvent<'static>>) -> Result<(), TrellisError> {
    let clipboard = serde_json::to_string(&diagram.source)?;
    events.push(block_html(format!(
        "<pre><code class=\"{}\" data-clipboard=\"{}\">",
        escape_attr(&diagram.language),
        escape_attr(&clipboard)
    )));
    events.push(MdEvent::Text(CowStr::from(diagram.source.clone())));
    events.push(block_html("</code></pre>\n".to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{
            ast::parse,
            preprocess::preprocess,
            transform::{transform, TransformContext},
        },
        links::CorpusSlugs,
    };
    use test_log::test;

    fn html_with(raw: &str, options: &TransformOptions, corpus: &CorpusSlugs) -> String {
        let link_options = LinkOptions::default();
        let mut ctx = TransformContext::new(options, &link_options, "source", corpus);
        let nodes = transform(parse(&preprocess(raw, options)), &mut ctx);
        render_html(&nodes, options, &link_options).expect("render")
    }

    fn html(raw: &str) -> String {
        html_with(raw, &TransformOptions::default(), &CorpusSlugs::default())
    }

    #[test]
    fn arrow_substitution_alters_nothing_else() {
        assert_eq!(html("A --> B"), "<p>A \u{21D2} B</p>\n");
    }

    #[test]
    fn internal_links_and_tags() {
        let out = html_with(
            "See [[Document B]] and #project",
            &TransformOptions::default(),
            &CorpusSlugs::new(["document-b", "source"]),
        );
        assert_eq!(
            out,
            "<p>See <a href=\"/document-b\" class=\"internal\" data-slug=\"document-b\">Document B</a> and <a href=\"/tags/project\" class=\"internal tag-link\">#project</a></p>\n"
        );
    }

    #[test]
    fn broken_links_lose_href() {
        let options = TransformOptions {
            disable_broken_links: true,
            ..Default::default()
        };
        let out = html_with("[[nonexistent|gone]]", &options, &CorpusSlugs::new(["source"]));
        assert_eq!(
            out,
            "<p><a class=\"internal broken alias\" data-slug=\"nonexistent\">gone</a></p>\n"
        );
    }

    #[test]
    fn external_links_get_icon() {
        let out = html("[site](https://example.com)");
        assert!(out.starts_with("<p><a href=\"https://example.com\" class=\"external\">site<svg"));
        assert!(out.ends_with("</svg></a></p>\n"));
    }

    #[test]
    fn highlight_and_embeds() {
        assert_eq!(
            html("==hi=="),
            "<p><span class=\"text-highlight\">hi</span></p>\n"
        );
        assert_eq!(
            html("![[cat.png|300]]"),
            "<p><img src=\"/cat.png\" alt=\"\" width=\"300\" height=\"auto\" loading=\"lazy\"></p>\n"
        );
        assert_eq!(
            html("![[talk.pdf]]"),
            "<p><iframe src=\"/talk.pdf\" class=\"pdf\"></iframe></p>\n"
        );
    }

    #[test]
    fn callout_markup() {
        let out = html("> [!faq]- Why?\n> Because.");
        assert!(out.starts_with(
            "<blockquote class=\"callout question is-collapsible is-collapsed\" data-callout=\"question\" data-callout-fold=\"collapsed\">"
        ));
        assert!(out.contains("<div class=\"callout-title-inner\"><p>Why?</p></div>"));
        assert!(out.contains("<div class=\"fold-callout-icon\"></div>"));
        assert!(out.contains("<div class=\"callout-content\">\n<p>Because.</p>\n</div>"));
        assert!(out.ends_with("</blockquote>\n"));
    }

    #[test]
    fn diagram_markup() {
        let out = html("```mermaid\nA-->B\n```\n");
        assert_eq!(
            out,
            "<pre><code class=\"mermaid\" data-clipboard=\"&quot;A--&gt;B\\n&quot;\">A--&gt;B\n</code></pre>\n"
        );
    }
}
