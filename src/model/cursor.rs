//! Cursors over the features produced by a result.

use super::feature::Feature;

/// Forward-only iteration over produced features.
///
/// A cursor may hold external resources (a database portal, a socket); it is
/// released by [`FeatureCursor::close`]. Closing twice is a no-op.
pub trait FeatureCursor: Send {
    /// Advance and return the next feature, or `None` when exhausted or closed.
    fn next_feature(&mut self) -> Option<Feature>;

    /// Release the resources held by this cursor.
    fn close(&mut self);

    /// Number of features still available, when cheaply known.
    fn remaining_hint(&self) -> Option<usize> {
        None
    }
}

const BEFORE_FIRST: i64 = -1;

/// Cursor that holds all its rows in memory and can be moved in both directions.
#[derive(Debug, Clone, Default)]
pub struct HeapCacheCursor {
    rows: Vec<Feature>,
    position: i64,
    closed: bool,
}

impl HeapCacheCursor {
    /// Create a cursor positioned before the first row.
    #[must_use]
    pub const fn new(rows: Vec<Feature>) -> Self {
        Self {
            rows,
            position: BEFORE_FIRST,
            closed: false,
        }
    }

    /// Read up to `limit` rows ahead from another cursor. `None` reads everything.
    pub fn from_cursor(source: &mut dyn FeatureCursor, limit: Option<usize>) -> Self {
        let mut rows = Vec::with_capacity(limit.or_else(|| source.remaining_hint()).unwrap_or(16));
        while limit.is_none_or(|limit| rows.len() < limit) {
            match source.next_feature() {
                Some(feature) => rows.push(feature),
                None => break,
            }
        }
        Self::new(rows)
    }

    fn last_position(&self) -> i64 {
        i64::try_from(self.rows.len()).unwrap_or(i64::MAX) - 1
    }

    /// Number of cached rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the cursor holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current position, `-1` before the first row.
    #[must_use]
    pub const fn position(&self) -> i64 {
        self.position
    }

    /// Whether another row follows the current one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.closed && self.position < self.last_position()
    }

    /// Move to the next row.
    pub fn next(&mut self) -> bool {
        if self.has_next() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Move to the previous row. Returns `false` once before the first row.
    pub fn previous(&mut self) -> bool {
        if self.position > BEFORE_FIRST {
            self.position -= 1;
            return self.position > BEFORE_FIRST;
        }
        false
    }

    /// Move before the first row.
    pub fn before_first(&mut self) {
        self.position = BEFORE_FIRST;
    }

    /// Move after the last row.
    pub fn after_last(&mut self) {
        self.position = self.last_position() + 1;
    }

    /// Move to the first row.
    pub fn first(&mut self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.position = 0;
        true
    }

    /// Move to the last row.
    pub fn last(&mut self) -> bool {
        self.position = self.last_position();
        self.position > BEFORE_FIRST
    }

    /// Jump to an absolute position. Out-of-range positions park the cursor
    /// before the first or after the last row and return `false`.
    pub fn absolute(&mut self, position: i64) -> bool {
        if position > self.last_position() {
            self.after_last();
            return false;
        }
        if position <= BEFORE_FIRST {
            self.before_first();
            return false;
        }
        self.position = position;
        true
    }

    /// Move relative to the current position.
    pub fn relative(&mut self, amount: i64) -> bool {
        self.absolute(self.position.saturating_add(amount))
    }

    /// Row at the current position.
    #[must_use]
    pub fn current(&self) -> Option<&Feature> {
        if self.closed {
            return None;
        }
        usize::try_from(self.position)
            .ok()
            .and_then(|idx| self.rows.get(idx))
    }

    /// Consume the cursor and return the cached rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Feature> {
        self.rows
    }
}

impl FeatureCursor for HeapCacheCursor {
    fn next_feature(&mut self) -> Option<Feature> {
        if self.next() {
            self.current().cloned()
        } else {
            None
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
        self.position = BEFORE_FIRST;
    }

    fn remaining_hint(&self) -> Option<usize> {
        if self.closed {
            return Some(0);
        }
        usize::try_from(self.last_position() - self.position).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(n: usize) -> HeapCacheCursor {
        HeapCacheCursor::new((0..n).map(|i| Feature::new(format!("f{i}"))).collect())
    }

    #[test]
    fn test_forward_iteration() {
        let mut c = cursor(3);
        let ids: Vec<String> = std::iter::from_fn(|| c.next_feature()).map(|f| f.id).collect();
        assert_eq!(ids, vec!["f0", "f1", "f2"]);
        assert_eq!(c.remaining_hint(), Some(0));
    }

    #[test]
    fn test_seek_operations() {
        let mut c = cursor(3);
        assert!(c.last());
        assert_eq!(c.current().map(|f| f.id.as_str()), Some("f2"));
        assert!(c.previous());
        assert_eq!(c.current().map(|f| f.id.as_str()), Some("f1"));
        assert!(!c.absolute(7));
        assert!(c.current().is_none());
        assert!(c.relative(-2));
        assert_eq!(c.current().map(|f| f.id.as_str()), Some("f1"));
        c.before_first();
        assert!(!c.previous());
        assert!(c.first());
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_empty_cursor() {
        let mut c = cursor(0);
        assert!(!c.first());
        assert!(!c.last());
        assert!(c.next_feature().is_none());
    }

    #[test]
    fn test_close_releases_rows() {
        let mut c = cursor(2);
        c.close();
        assert!(c.is_empty());
        assert!(c.next_feature().is_none());
        c.close();
    }

    #[test]
    fn test_from_cursor_honours_limit() {
        let mut source = cursor(5);
        let cached = HeapCacheCursor::from_cursor(&mut source, Some(2));
        assert_eq!(cached.len(), 2);
        let rest = HeapCacheCursor::from_cursor(&mut source, None);
        assert_eq!(rest.len(), 3);
    }
}
