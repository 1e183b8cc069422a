//! Label items: the QR codes selected for printing.
//!
//! A label item pairs a tag id with the URL its QR code points to. The URL is
//! derived from the public origin of the scan site, so every printed code
//! resolves to `origin/qr/<id>`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Path segment between the origin and the tag id.
const SCAN_PATH: &str = "/qr/";

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap_or_else(|e| panic!("invalid id pattern: {e}"))
});

/// One QR code to be printed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelItem {
    /// The tag id, unique per device.
    pub id: String,
    /// The URL encoded in the QR code.
    pub target_url: String,
}

impl LabelItem {
    /// Create a label item for `id`, deriving its target URL from `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] if the id is not a valid tag id.
    pub fn new(id: impl Into<String>, origin: &str) -> Result<Self> {
        let id = id.into();
        if !is_valid_id(&id) {
            return Err(Error::invalid_selection(format!(
                "'{id}' is not a valid tag id (expected 1-64 letters, digits, '-' or '_')"
            )));
        }
        let target_url = target_url_for(origin, &id);
        Ok(Self { id, target_url })
    }
}

/// Check whether `id` is acceptable as a tag id.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Build the scan URL for a tag id.
#[must_use]
pub fn target_url_for(origin: &str, id: &str) -> String {
    format!("{}{SCAN_PATH}{id}", origin.trim_end_matches('/'))
}

/// Turn an ordered list of ids into label items.
///
/// Order is preserved. Blank entries are ignored after trimming.
///
/// # Errors
///
/// Returns [`Error::EmptySelection`] if no ids remain, or
/// [`Error::InvalidSelection`] if any id is malformed or repeated.
pub fn items_from_ids<I, S>(ids: I, origin: &str) -> Result<Vec<LabelItem>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for raw in ids {
        let id = raw.as_ref().trim();
        if id.is_empty() {
            continue;
        }
        if !seen.insert(id.to_string()) {
            return Err(Error::invalid_selection(format!(
                "tag id '{id}' is selected more than once"
            )));
        }
        items.push(LabelItem::new(id, origin)?);
    }

    if items.is_empty() {
        return Err(Error::EmptySelection);
    }
    Ok(items)
}

/// Parse an id list file: one id per line, `#` starts a comment.
#[must_use]
pub fn parse_id_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://tags.example.org";

    #[test]
    fn test_target_url() {
        let item = LabelItem::new("Ab3dE9xZ", ORIGIN).unwrap();
        assert_eq!(item.target_url, "https://tags.example.org/qr/Ab3dE9xZ");
    }

    #[test]
    fn test_target_url_trims_trailing_slash() {
        assert_eq!(
            target_url_for("https://tags.example.org/", "qr123"),
            "https://tags.example.org/qr/qr123"
        );
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("qr123"));
        assert!(is_valid_id("A-b_C"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("slash/id"));
        assert!(!is_valid_id(&"x".repeat(65)));
    }

    #[test]
    fn test_items_preserve_order() {
        let items = items_from_ids(["C", "A", "B"], ORIGIN).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_items_empty_selection() {
        let result = items_from_ids(Vec::<String>::new(), ORIGIN);
        assert!(matches!(result, Err(Error::EmptySelection)));

        let result = items_from_ids(["", "  "], ORIGIN);
        assert!(matches!(result, Err(Error::EmptySelection)));
    }

    #[test]
    fn test_items_reject_duplicates() {
        let result = items_from_ids(["A", "B", "A"], ORIGIN);
        let err = result.unwrap_err();
        assert!(matches!(err, Error::InvalidSelection { .. }));
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn test_items_reject_malformed() {
        let result = items_from_ids(["good", "b@d"], ORIGIN);
        assert!(matches!(result, Err(Error::InvalidSelection { .. })));
    }

    #[test]
    fn test_parse_id_list() {
        let contents = "abc\n\n  def  \n# comment\nghi # trailing\n";
        assert_eq!(parse_id_list(contents), vec!["abc", "def", "ghi"]);
    }
}
