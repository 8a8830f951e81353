//! Utility functions shared by the parser and the persistence layer.
//!
//! - **Link resolution**: turning digest hrefs into validated, de-tracked article URLs
//! - **Text cleanup**: headline normalization, reading-time extraction, bounded error strings

mod text;
mod url_validator;

pub use text::{clean_title, collapse_whitespace, extract_reading_time, truncate_chars};
pub use url_validator::{resolve_article_link, LinkError};

/// Maximum length (in chars) of an error message persisted on a day row.
pub const MAX_ERROR_LEN: usize = 500;
