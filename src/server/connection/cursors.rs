/// An open paging cursor.
#[derive(Debug)]
pub struct Cursor<Q> {
    /// Whatever is needed to fetch the next page.
    pub query: Q,
    /// Columns per row, fixed when the cursor was declared.
    pub column_count: usize,
}

/// Cursor misuse by the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("cursor index {index} out of bounds (table has {len} slots)")]
    OutOfBounds { index: i64, len: usize },

    #[error("cursor {0} is closed")]
    Closed(usize),
}

/// Open cursors of one connection, addressed by position.
///
/// New cursors are appended. Closing a cursor empties its slot; empty
/// slots at the tail are trimmed, empty slots in the middle stay so the
/// indices of later cursors never change.
///
/// NOTE: No synchronization needed - the table is owned by a single connection.
#[derive(Debug)]
pub struct CursorTable<Q> {
    slots: Vec<Option<Cursor<Q>>>,
}

impl<Q> Default for CursorTable<Q> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<Q> CursorTable<Q> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cursor and returns its index.
    pub fn declare(&mut self, query: Q, column_count: usize) -> usize {
        self.slots.push(Some(Cursor {
            query,
            column_count,
        }));
        self.slots.len() - 1
    }

    /// Checks that `index` names an open cursor.
    pub fn validate(&self, index: i32) -> Result<usize, CursorError> {
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < self.slots.len())
            .ok_or(CursorError::OutOfBounds {
                index: i64::from(index),
                len: self.slots.len(),
            })?;
        match self.slots[slot] {
            Some(_) => Ok(slot),
            None => Err(CursorError::Closed(slot)),
        }
    }

    pub fn get_mut(&mut self, index: i32) -> Result<&mut Cursor<Q>, CursorError> {
        let slot = self.validate(index)?;
        self.slots[slot].as_mut().ok_or(CursorError::Closed(slot))
    }

    /// Removes the cursor at `slot` and trims empty slots off the tail.
    pub fn close(&mut self, slot: usize) -> Option<Cursor<Q>> {
        let cursor = self.slots.get_mut(slot)?.take();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        cursor
    }

    /// Number of slots, open or closed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Abandons every cursor.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_increase_from_zero() {
        let mut table = CursorTable::new();
        assert_eq!(table.declare("a", 1), 0);
        assert_eq!(table.declare("b", 1), 1);
        assert_eq!(table.declare("c", 2), 2);
        assert_eq!(table.get_mut(2).unwrap().column_count, 2);
    }

    #[test]
    fn test_closed_middle_slot_is_not_reused() {
        let mut table = CursorTable::new();
        table.declare("a", 1);
        table.declare("b", 1);
        table.declare("c", 1);

        assert_eq!(table.close(1).map(|c| c.query), Some("b"));
        assert_eq!(table.len(), 3);
        assert_eq!(table.validate(1), Err(CursorError::Closed(1)));
        assert_eq!(table.get_mut(2).unwrap().query, "c");

        assert_eq!(table.declare("d", 1), 3);
        assert_eq!(table.open_count(), 3);
    }

    #[test]
    fn test_closing_tail_trims_empty_slots() {
        let mut table = CursorTable::new();
        table.declare("a", 1);
        table.declare("b", 1);
        table.declare("c", 1);

        table.close(1);
        table.close(2);
        assert_eq!(table.len(), 1);

        // The last open cursor was the highest index, so its index comes back.
        assert_eq!(table.declare("d", 1), 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut table: CursorTable<&str> = CursorTable::new();
        assert_eq!(
            table.validate(0),
            Err(CursorError::OutOfBounds { index: 0, len: 0 })
        );

        table.declare("a", 1);
        assert_eq!(
            table.validate(-1),
            Err(CursorError::OutOfBounds { index: -1, len: 1 })
        );
        assert!(table.get_mut(1).is_err());
    }

    #[test]
    fn test_close_all_empties_table() {
        let mut table = CursorTable::new();
        table.declare("a", 1);
        table.declare("b", 1);

        table.close(0);
        assert_eq!(table.len(), 2);
        table.close(1);
        assert!(table.is_empty());
        assert!(table.close(0).is_none());
    }
}
