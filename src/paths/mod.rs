//! Slug and anchor rules shared by the link resolver, the tag rule and the store.
pub mod corpus;
pub mod path;

pub use corpus::load_documents;

pub use path::{
    as_anchor, slug_tag, slugify_path, slugify_segment, split_anchor, to_anchor, SlugPath,
    DOCUMENT_EXTENSIONS,
};
