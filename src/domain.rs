use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CategoryError;

/// Stable key of a downloadable item, in practice its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as a display name when the catalog has none.
    pub fn slug(&self) -> &str {
        let path = self.0.split(['?', '#']).next().unwrap_or(&self.0);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = CategoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || normalized.contains(['\n', '\r']) {
            return Err(CategoryError::InvalidItemId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for ItemId {
    type Error = CategoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemId> for String {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Standalone,
    SeriesParent { children: Vec<ItemId> },
}

/// One entry of a catalog listing, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
}

impl DiscoveredItem {
    pub fn standalone(id: ItemId) -> Self {
        let name = id.slug().to_string();
        Self {
            id,
            name,
            kind: ItemKind::Standalone,
        }
    }

    pub fn series(id: ItemId, children: Vec<ItemId>) -> Self {
        let name = id.slug().to_string();
        Self {
            id,
            name,
            kind: ItemKind::SeriesParent { children },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ItemKind::Standalone => "standalone",
            ItemKind::SeriesParent { .. } => "series",
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_item_id_trims() {
        let id: ItemId = "  https://www.svtplay.se/video/abc \n".parse().unwrap();
        assert_eq!(id.as_str(), "https://www.svtplay.se/video/abc");
    }

    #[test]
    fn parse_item_id_rejects_blank() {
        let err = "   ".parse::<ItemId>().unwrap_err();
        assert_matches!(err, CategoryError::InvalidItemId(_));
    }

    #[test]
    fn parse_item_id_rejects_embedded_newline() {
        let err = "a\nb".parse::<ItemId>().unwrap_err();
        assert_matches!(err, CategoryError::InvalidItemId(_));
    }

    #[test]
    fn slug_uses_last_segment() {
        let id: ItemId = "https://www.svtplay.se/rapport/?tab=all".parse().unwrap();
        assert_eq!(id.slug(), "rapport");
        let bare: ItemId = "A".parse().unwrap();
        assert_eq!(bare.slug(), "A");
    }
}
