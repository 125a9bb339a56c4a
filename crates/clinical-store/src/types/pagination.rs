//! Pagination types.
//!
//! Search results are paged by offset. History pages and the bulk re-index
//! use keyset positions wrapped in an opaque [`PageCursor`].

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// An opaque keyset position.
///
/// Cursors are base64-encoded JSON holding the sort key of the last item
/// returned and its identity for tie-breaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Cursor format version.
    version: u8,

    /// The sort key at the cursor position.
    position: CursorValue,

    /// Identity of the item at the cursor position.
    resource_id: String,
}

/// A sort-key value stored in a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    /// Numeric value.
    Number(i64),
    /// String value.
    String(String),
}

impl PageCursor {
    /// Creates a new cursor at the given position.
    pub fn new(position: impl Into<CursorValue>, resource_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            position: position.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Returns the sort key at the cursor position.
    pub fn position(&self) -> &CursorValue {
        &self.position
    }

    /// Returns the numeric sort key, if the position is numeric.
    pub fn position_number(&self) -> Option<i64> {
        match self.position {
            CursorValue::Number(n) => Some(n),
            CursorValue::String(_) => None,
        }
    }

    /// Returns the identity at the cursor position.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Encodes the cursor to an opaque string.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(&json)
    }

    /// Decodes a cursor from an opaque string.
    pub fn decode(s: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::MalformedValue {
            name: "_cursor".to_string(),
            message: format!("'{}' is not a valid cursor", s),
        };
        let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

impl From<i64> for CursorValue {
    fn from(n: i64) -> Self {
        CursorValue::Number(n)
    }
}

impl From<&str> for CursorValue {
    fn from(s: &str) -> Self {
        CursorValue::String(s.to_string())
    }
}

impl From<String> for CursorValue {
    fn from(s: String) -> Self {
        CursorValue::String(s)
    }
}

/// Information about a page of results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    /// Offset of the next page, for offset-paged results.
    pub next_offset: Option<u32>,

    /// Cursor of the next page, for keyset-paged results.
    pub next_cursor: Option<String>,

    /// Total number of matching items, when computed.
    pub total: Option<u64>,

    /// Whether there are more results after this page.
    pub has_next: bool,
}

impl PageInfo {
    /// Creates page info indicating no more pages.
    pub fn end() -> Self {
        Self::default()
    }

    /// Creates page info pointing at the next offset.
    pub fn with_next_offset(offset: u32) -> Self {
        Self {
            next_offset: Some(offset),
            has_next: true,
            ..Self::default()
        }
    }

    /// Creates page info with a next cursor.
    pub fn with_next(cursor: PageCursor) -> Self {
        Self {
            next_cursor: Some(cursor.encode()),
            has_next: true,
            ..Self::default()
        }
    }

    /// Sets the total count.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// A page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,

    /// Pagination information.
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Creates a new page with the given items and page info.
    pub fn new(items: Vec<T>, page_info: PageInfo) -> Self {
        Self { items, page_info }
    }

    /// Creates an empty page.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            page_info: PageInfo::end(),
        }
    }

    /// Returns true if this page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items in this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Maps the items to a different type.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_info: self.page_info,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encode_decode() {
        let cursor = PageCursor::new(42, "Patient/p1");
        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert_eq!(decoded.position_number(), Some(42));
        assert_eq!(decoded.resource_id(), "Patient/p1");
    }

    #[test]
    fn test_cursor_decode_rejects_garbage() {
        assert!(PageCursor::decode("not a cursor!").is_err());
        assert!(PageCursor::decode(&URL_SAFE_NO_PAD.encode(b"[1,2]")).is_err());
    }

    #[test]
    fn test_page_map() {
        let page = Page::new(vec![1, 2, 3], PageInfo::with_next_offset(3).with_total(10));
        let mapped = page.map(|n| n * 2);
        assert_eq!(mapped.items, vec![2, 4, 6]);
        assert_eq!(mapped.page_info.total, Some(10));
        assert!(mapped.page_info.has_next);
    }
}
