use pulldown_cmark::{MetadataBlockKind, Tag as MdTag};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use crate::{codec::ast::Node, error::TrellisError};

/// Document metadata from a leading YAML block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    /// Raw tag names, before slugging.
    pub tags: Vec<String>,
    pub excerpt: Option<String>,
    /// Every other key, untouched.
    pub extra: BTreeMap<String, Value>,
}

pub fn parse_frontmatter(yaml: &str) -> Result<Frontmatter, TrellisError> {
    if yaml.trim().is_empty() {
        return Ok(Frontmatter::default());
    }
    let mapping = match serde_yaml::from_str::<Value>(yaml)? {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        other => {
            return Err(TrellisError::Codec(format!(
                "front matter must be a mapping, found {other:?}"
            )))
        }
    };

    let mut frontmatter = Frontmatter::default();
    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "title" => frontmatter.title = scalar_string(&value),
            "tags" | "tag" => frontmatter.tags.extend(tag_list(&value)),
            "excerpt" => frontmatter.excerpt = scalar_string(&value),
            "description" if frontmatter.excerpt.is_none() => {
                frontmatter.excerpt = scalar_string(&value)
            }
            _ => {
                frontmatter.extra.insert(key, value);
            }
        }
    }
    Ok(frontmatter)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn tag_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(|tag| tag.trim().trim_start_matches('#').to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Remove the leading YAML metadata block from `nodes` and parse it. Unparseable front matter is
/// logged and dropped.
pub fn take_frontmatter(nodes: &mut Vec<Node>) -> Option<Frontmatter> {
    let is_yaml = matches!(
        nodes.first(),
        Some(Node::Container {
            tag: MdTag::MetadataBlock(MetadataBlockKind::YamlStyle),
            ..
        })
    );
    if !is_yaml {
        return None;
    }
    let Node::Container { children, .. } = nodes.remove(0) else {
        return None;
    };
    let yaml = children
        .iter()
        .filter_map(Node::as_text)
        .collect::<Vec<_>>()
        .concat();
    match parse_frontmatter(&yaml) {
        Ok(frontmatter) => Some(frontmatter),
        Err(e) => {
            tracing::warn!("[frontmatter] ignoring unparseable front matter: {e}");
            None
        }
    }
}
