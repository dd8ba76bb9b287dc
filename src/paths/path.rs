use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use unicode_normalization::UnicodeNormalization;

/// Extensions stripped from document paths when they become slugs.
pub const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// Turn a title string into a regularized anchor string
pub fn to_anchor(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .replace(char::is_whitespace, "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect()
}

pub fn as_anchor(anchor: &str) -> String {
    let anchorized = to_anchor(anchor);
    if !anchorized.is_empty() {
        format!("#{anchorized}")
    } else {
        "".to_string()
    }
}

/// Slugify one path segment: NFC-normalize, lowercase, turn whitespace runs into a single `-`,
/// spell out `&` and `%`, and drop anything that is not alphanumeric, `-`, `_` or `.`.
pub fn slugify_segment(segment: &str) -> String {
    let spelled = segment
        .trim()
        .nfc()
        .collect::<String>()
        .replace('&', "-and-")
        .replace('%', "-percent");
    let mut slug = String::with_capacity(spelled.len());
    for c in spelled.chars() {
        if c.is_whitespace() || c == '-' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        } else if c.is_alphanumeric() || c == '_' || c == '.' {
            slug.extend(c.to_lowercase());
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Slugify a `/`-separated document path. `.` segments and empty segments are dropped, `..` is
/// kept for [`SlugPath::normalize`] to resolve, and a trailing markdown extension is removed.
pub fn slugify_path(path: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    for part in path.split('/') {
        match part.trim() {
            "" | "." => {}
            ".." => segments.push("..".to_string()),
            other => {
                let slug = slugify_segment(other);
                if !slug.is_empty() {
                    segments.push(slug);
                }
            }
        }
    }
    if let Some(last) = segments.last_mut() {
        if let Some((stem, ext)) = last.rsplit_once('.') {
            if !stem.is_empty() && DOCUMENT_EXTENSIONS.contains(&ext) {
                *last = stem.to_string();
            }
        }
    }
    segments.join("/")
}

/// Slugify a tag name, preserving its `/`-separated hierarchy.
pub fn slug_tag(tag: &str) -> String {
    tag.split('/')
        .map(slugify_segment)
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a link target at the first `#`. The anchor excludes the `#` itself.
pub fn split_anchor(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((path, anchor)) => (path, Some(anchor)),
        None => (target, None),
    }
}

/// A slug-shaped path (`dir/sub/name#anchor`) with the separators located once up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlugPath<'a> {
    pub path: &'a str,
    /// Index of the last '/' before the anchor
    dir_sep: Option<usize>,
    /// Index of the first '#'
    anc_sep: Option<usize>,
}

impl<'a> SlugPath<'a> {
    pub fn new(path: &'a str) -> SlugPath<'a> {
        let anc_sep = path.find('#');
        let dir_sep = path[0..anc_sep.unwrap_or(path.len())].rfind('/');
        SlugPath {
            path,
            dir_sep,
            anc_sep,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    pub fn is_anchor(&self) -> bool {
        self.anc_sep == Some(0)
    }

    pub fn dir(&self) -> &'a str {
        &self.path[0..self.dir_sep.unwrap_or(0)]
    }

    pub fn basename(&self) -> &'a str {
        let start_idx = self.dir_sep.map(|idx| idx + 1).unwrap_or(0);
        &self.path[start_idx..self.anc_sep.unwrap_or(self.path.len())]
    }

    pub fn filepath(&self) -> &'a str {
        &self.path[0..self.anc_sep.unwrap_or(self.path.len())]
    }

    pub fn anchor(&self) -> &'a str {
        let start_idx = self.anc_sep.map(|idx| idx + 1).unwrap_or(self.path.len());
        &self.path[start_idx..]
    }

    /// Extension of the basename, ignoring dot-files.
    pub fn ext(&self) -> &'a str {
        let basename = self.basename();
        match basename.rfind('.') {
            Some(idx) if idx > 0 => &basename[idx + 1..],
            _ => "",
        }
    }

    pub fn depth(&self) -> usize {
        let filepath = self.filepath().trim_matches('/');
        if filepath.is_empty() {
            0
        } else {
            filepath.split('/').count()
        }
    }

    /// Join `end` onto this path's directory. Absolute `end` paths replace it entirely.
    pub fn join<E: AsRef<str>>(&self, end_ref: E) -> String {
        let end = SlugPath::new(end_ref.as_ref());
        if end.is_absolute() {
            return end.normalize();
        }
        if end.path.is_empty() {
            return self.normalize();
        }
        let joined = if self.dir().is_empty() {
            end.path.to_string()
        } else {
            format!("{}/{}", self.dir(), end.path)
        };
        SlugPath::new(&joined).normalize()
    }

    /// Resolve `.` and `..` components. Slugs are corpus-rooted, so the leading `/` is dropped and
    /// `..` never climbs above the root.
    pub fn normalize(&self) -> String {
        let mut components: Vec<&str> = Vec::new();
        for part in self.filepath().split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                _ => components.push(part),
            }
        }
        let filepath = components.join("/");
        if self.anc_sep.is_some() {
            format!("{}#{}", filepath, self.anchor())
        } else {
            filepath
        }
    }
}

impl<'a, T: AsRef<str> + ?Sized> From<&'a T> for SlugPath<'a> {
    fn from(path: &'a T) -> Self {
        SlugPath::new(path.as_ref())
    }
}

impl<'a> AsRef<str> for SlugPath<'a> {
    fn as_ref(&self) -> &str {
        self.path
    }
}

impl<'a> Display for SlugPath<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_slug_path_parsing() {
        let pa = SlugPath::from("dir/file");
        assert_eq!(pa.dir(), "dir");
        assert_eq!(pa.basename(), "file");
        assert_eq!(pa.anchor(), "");
        assert_eq!(pa.filepath(), "dir/file");
        assert_eq!(pa.depth(), 2);

        let pa = SlugPath::from("notes/dir/file#anchor");
        assert_eq!(pa.dir(), "notes/dir");
        assert_eq!(pa.basename(), "file");
        assert_eq!(pa.anchor(), "anchor");
        assert_eq!(pa.filepath(), "notes/dir/file");

        let pa = SlugPath::from("#anchor");
        assert!(pa.is_anchor());
        assert_eq!(pa.dir(), "");
        assert_eq!(pa.basename(), "");
        assert_eq!(pa.depth(), 0);

        let pa = SlugPath::from("media/photo.final.png#frag");
        assert_eq!(pa.ext(), "png");
        assert_eq!(SlugPath::new(".hidden").ext(), "");
        assert_eq!(SlugPath::new("noext").ext(), "");
    }

    #[test]
    fn test_join_and_normalize() {
        let src = SlugPath::new("guides/setup/install");
        assert_eq!(src.join("config"), "guides/setup/config");
        assert_eq!(src.join("../intro"), "guides/intro");
        assert_eq!(src.join("../../../../top"), "top");
        assert_eq!(src.join("/root-doc"), "root-doc");
        assert_eq!(src.join("./peer#part"), "guides/setup/peer#part");
        assert_eq!(SlugPath::new("top").join("sibling"), "sibling");
        assert_eq!(SlugPath::new("a/./b/../c").normalize(), "a/c");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify_segment("Document B"), "document-b");
        assert_eq!(slugify_segment("  Rock & Roll  "), "rock-and-roll");
        assert_eq!(slugify_segment("What? Why!"), "what-why");
        assert_eq!(slugify_segment("100%"), "100-percent");
        assert_eq!(slugify_segment("a -- b"), "a-b");
        assert_eq!(slugify_segment("日本語 ノート"), "日本語-ノート");
        assert_eq!(slugify_path("Notes/My Page.md"), "notes/my-page");
        assert_eq!(slugify_path("./Notes//Other Page"), "notes/other-page");
        assert_eq!(slugify_path("../Up One"), "../up-one");
        assert_eq!(slugify_path("assets/Diagram 1.PNG"), "assets/diagram-1.png");
    }

    #[test]
    fn test_slug_tag() {
        assert_eq!(slug_tag("Foo"), "foo");
        assert_eq!(slug_tag("Project/Sub Task"), "project/sub-task");
        assert_eq!(slug_tag("a//b/"), "a/b");
    }

    #[test]
    fn test_split_anchor_uses_first_hash() {
        assert_eq!(split_anchor("page#one#two"), ("page", Some("one#two")));
        assert_eq!(split_anchor("page"), ("page", None));
        assert_eq!(split_anchor("#only"), ("", Some("only")));
        assert_eq!(as_anchor("Getting Started!"), "#getting-started");
        assert_eq!(as_anchor("  "), "");
    }
}
