//! Text editing helpers: turning a whole-string replacement into a minimal
//! splice, and keeping a caret stable across remote edits.
//!
//! All positions count Unicode scalar values.

/// A single splice: remove `removed` at `index`, then insert `inserted`
/// there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Character offset of the splice.
    pub index: usize,
    /// Text removed from the previous value.
    pub removed: String,
    /// Text inserted in its place.
    pub inserted: String,
}

/// Compute the edit that turns `previous` into `value`, trimming their
/// common prefix and suffix. Returns `None` when the strings are equal.
///
/// ```
/// use docsync::text::diff;
///
/// let edit = diff("hello world", "hello brave world").unwrap();
/// assert_eq!(edit.index, 6);
/// assert_eq!(edit.removed, "");
/// assert_eq!(edit.inserted, "brave ");
/// ```
pub fn diff(previous: &str, value: &str) -> Option<TextEdit> {
    if previous == value {
        return None;
    }
    let before: Vec<char> = previous.chars().collect();
    let after: Vec<char> = value.chars().collect();

    let start = before
        .iter()
        .zip(&after)
        .take_while(|(a, b)| a == b)
        .count();
    let end = before[start..]
        .iter()
        .rev()
        .zip(after[start..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    Some(TextEdit {
        index: start,
        removed: before[start..before.len() - end].iter().collect(),
        inserted: after[start..after.len() - end].iter().collect(),
    })
}

/// Where a caret at `cursor` ends up after `len` characters are inserted at
/// `index`. Insertions at the caret push it forward.
pub fn transform_cursor_insert(cursor: usize, index: usize, len: usize) -> usize {
    if index <= cursor {
        cursor + len
    } else {
        cursor
    }
}

/// Where a caret at `cursor` ends up after `len` characters are removed at
/// `index`. A caret inside the removed range moves to its start.
pub fn transform_cursor_remove(cursor: usize, index: usize, len: usize) -> usize {
    if index < cursor {
        cursor - len.min(cursor - index)
    } else {
        cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_have_no_edit() {
        assert_eq!(diff("same", "same"), None);
    }

    #[test]
    fn replacement_in_the_middle() {
        let edit = diff("the cat sat", "the dog sat").unwrap();
        assert_eq!(edit.index, 4);
        assert_eq!(edit.removed, "cat");
        assert_eq!(edit.inserted, "dog");
    }

    #[test]
    fn repeated_characters_do_not_overlap() {
        // prefix and suffix both want the shared "a"
        let edit = diff("a", "aa").unwrap();
        assert_eq!(edit.removed, "");
        assert_eq!(edit.inserted, "a");
        let edit = diff("aaa", "a").unwrap();
        assert_eq!(edit.removed.chars().count(), 2);
        assert_eq!(edit.inserted, "");
    }

    #[test]
    fn multibyte_offsets_are_characters() {
        let edit = diff("héllo", "héllø").unwrap();
        assert_eq!(edit.index, 4);
        assert_eq!(edit.removed, "o");
        assert_eq!(edit.inserted, "ø");
    }

    #[test]
    fn cursor_follows_edits() {
        assert_eq!(transform_cursor_insert(5, 2, 3), 8);
        assert_eq!(transform_cursor_insert(5, 5, 3), 8);
        assert_eq!(transform_cursor_insert(5, 6, 3), 5);
        assert_eq!(transform_cursor_remove(5, 1, 2), 3);
        assert_eq!(transform_cursor_remove(5, 3, 10), 3);
        assert_eq!(transform_cursor_remove(5, 5, 2), 5);
    }
}
