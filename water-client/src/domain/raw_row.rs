use std::collections::BTreeMap;

/// A single cell of a raw meter sheet row, before any coercion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum RawCell {
    Number(f64),
    Text(String),
    Empty,
}

impl RawCell {
    /// Wrap a text cell; blank text becomes `Empty`.
    pub fn from_text(s: &str) -> Self {
        if s.trim().is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(s.to_string())
        }
    }

    /// Trimmed text form, `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawCell::Number(n) => Some(n.to_string()),
            RawCell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            RawCell::Empty => None,
        }
    }
}

impl From<f64> for RawCell {
    fn from(n: f64) -> Self {
        RawCell::Number(n)
    }
}

impl From<&str> for RawCell {
    fn from(s: &str) -> Self {
        RawCell::from_text(s)
    }
}

/// A loosely shaped meter row keyed by whatever headers the feed used.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RawRow {
    cells: BTreeMap<String, RawCell>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: impl Into<String>, cell: impl Into<RawCell>) {
        self.cells.insert(header.into(), cell.into());
    }

    /// Builder-style `insert`.
    pub fn with(mut self, header: impl Into<String>, cell: impl Into<RawCell>) -> Self {
        self.insert(header, cell);
        self
    }

    pub fn get(&self, header: &str) -> Option<&RawCell> {
        self.cells.get(header)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawCell)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<RawCell>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_empty() {
        assert_eq!(RawCell::from_text("   "), RawCell::Empty);
        assert_eq!(RawCell::from_text(" L2 ").as_text().as_deref(), Some("L2"));
        assert_eq!(RawCell::Empty.as_text(), None);
    }

    #[test]
    fn row_builder_overwrites_duplicate_headers() {
        let row = RawRow::new().with("Zone", "Zone_05").with("Zone", "Zone_08");
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("Zone"), Some(&RawCell::Text("Zone_08".to_string())));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn row_deserializes_mixed_json_cells() {
        let row: RawRow =
            serde_json::from_str(r#"{"Meter Label":"Z5-17","Jan-25":112,"Feb-25":null}"#).unwrap();
        assert_eq!(row.get("Jan-25"), Some(&RawCell::Number(112.0)));
        assert_eq!(row.get("Feb-25"), Some(&RawCell::Empty));
        assert_eq!(row.get("Meter Label"), Some(&RawCell::Text("Z5-17".to_string())));
    }
}
