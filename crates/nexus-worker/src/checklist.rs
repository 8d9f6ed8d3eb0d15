//! Checklist document parsing

use regex::Regex;

/// Finds pending items in a markdown checklist.
///
/// A pending item is a line like `- [ ] text`. Inline HTML comments such as
/// `<!-- id: 2 -->` are stripped from the returned text.
pub struct ChecklistParser {
    item_re: Regex,
    comment_re: Regex,
}

impl ChecklistParser {
    pub fn new() -> Self {
        Self {
            item_re: Regex::new(r"^\s*-\s*\[\s*\]\s*(.+)").unwrap(),
            comment_re: Regex::new(r"<!--.*?-->").unwrap(),
        }
    }

    /// Text of the first unchecked item, skipping items that are empty
    /// once annotations are removed
    pub fn next_pending<'a, I>(&self, lines: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines.into_iter().find_map(|line| {
            let captures = self.item_re.captures(line)?;
            let text = self.comment_re.replace_all(captures[1].trim(), "");
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
    }

    /// First unchecked item in a whole document
    pub fn next_pending_in(&self, document: &str) -> Option<String> {
        self.next_pending(document.lines())
    }
}

impl Default for ChecklistParser {
    fn default() -> Self {
        Self::new()
    }
}
