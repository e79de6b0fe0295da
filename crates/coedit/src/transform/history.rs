use serde::{Deserialize, Serialize};

use super::TransformOperation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub label: String,
    /// `None` for the original text
    pub operation: Option<TransformOperation>,
    pub text: String,
}

/// Successive results of transforming one piece of text
///
/// The first entry is the text as it was before any transform. Entries are
/// only appended; stepping back produces a shorter copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditHistory {
    entries: Vec<HistoryEntry>,
}

impl EditHistory {
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            entries: vec![HistoryEntry {
                label: "Original".to_string(),
                operation: None,
                text: original.into(),
            }],
        }
    }

    /// Append a result and return its index
    pub fn push(&mut self, operation: TransformOperation, text: impl Into<String>) -> usize {
        self.entries.push(HistoryEntry {
            label: operation.label(),
            operation: Some(operation),
            text: text.into(),
        });
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The history up to and including `index`
    pub fn truncated(&self, index: usize) -> Self {
        let end = (index + 1).min(self.entries.len());
        Self {
            entries: self.entries[..end].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Tone;

    #[test]
    fn test_push_and_latest() {
        let mut history = EditHistory::new("teh draft");
        let index = history.push(TransformOperation::GrammarFix, "The draft");

        assert_eq!(index, 1);
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().label, "Grammar fixed");
        assert_eq!(history.get(0).unwrap().operation, None);
    }

    #[test]
    fn test_truncated_leaves_original_untouched() {
        let mut history = EditHistory::new("a");
        history.push(TransformOperation::Expand, "a b");
        history.push(TransformOperation::ToneChange(Tone::Formal), "A. B.");

        let back = history.truncated(1);
        assert_eq!(back.len(), 2);
        assert_eq!(back.latest().unwrap().text, "a b");
        assert_eq!(history.len(), 3);

        assert_eq!(history.truncated(10), history);
    }
}
