//! Approximate line diff between two contents.
//!
//! Lines are compared by position up to the shorter length; the difference in
//! line count is reported as pure additions or removals. This is not a
//! line-matching diff: inserting a line at the top of a document shows up as
//! every following line "changed" plus one addition.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub total_lines: usize,
}

impl LineDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.changed == 0
    }
}

pub fn diff(old_content: &str, new_content: &str) -> LineDiff {
    let old_lines: Vec<&str> = old_content.split('\n').collect();
    let new_lines: Vec<&str> = new_content.split('\n').collect();

    let changed = old_lines
        .iter()
        .zip(new_lines.iter())
        .filter(|(old, new)| old != new)
        .count();

    LineDiff {
        added: new_lines.len().saturating_sub(old_lines.len()),
        removed: old_lines.len().saturating_sub(new_lines.len()),
        changed,
        total_lines: old_lines.len().max(new_lines.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a\nb\nc", "a\nx\nc\nd", 1, 0, 1, 4)]
    #[case("a\nb\nc", "a\nb", 0, 1, 0, 3)]
    #[case("same", "same", 0, 0, 0, 1)]
    #[case("", "", 0, 0, 0, 1)]
    #[case("", "one\ntwo", 1, 0, 1, 2)]
    #[case("b\nc", "a\nb\nc", 1, 0, 2, 3)]
    fn test_positional_diff(
        #[case] old: &str,
        #[case] new: &str,
        #[case] added: usize,
        #[case] removed: usize,
        #[case] changed: usize,
        #[case] total_lines: usize,
    ) {
        let result = diff(old, new);
        assert_eq!(
            result,
            LineDiff {
                added,
                removed,
                changed,
                total_lines
            }
        );
    }

    #[test]
    fn test_unchanged() {
        assert!(diff("x\ny", "x\ny").is_unchanged());
        assert!(!diff("x", "y").is_unchanged());
    }
}
