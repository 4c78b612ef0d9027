use crate::storage::{Result, StoreError, StoreErrorKind};

/// Keeps between `size` and `2 * size` of the most recent items of a gapless index sequence.
#[derive(Debug, Clone)]
pub(crate) struct RollingIndex<T> {
    size: usize,
    last_index: i64,
    items: Vec<T>,
}

impl<T: Clone> RollingIndex<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self::with_last_index(size, -1)
    }

    /// Starts an index whose next accepted item is `last_index + 1`.
    pub(crate) fn with_last_index(size: usize, last_index: i64) -> Self {
        RollingIndex {
            size,
            last_index,
            items: Vec::with_capacity(2 * size),
        }
    }

    pub(crate) fn last_index(&self) -> i64 {
        self.last_index
    }

    pub(crate) fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Items currently held and the index of the newest one.
    pub(crate) fn last_window(&self) -> (&[T], i64) {
        (&self.items, self.last_index)
    }

    /// Items with index greater than `skip_index`.
    pub(crate) fn get(&self, skip_index: i64) -> Result<Vec<T>> {
        if skip_index >= self.last_index {
            return Ok(vec![]);
        }
        let oldest = self.oldest_index();
        if skip_index + 1 < oldest {
            return Err(StoreError::new(
                "RollingIndex",
                StoreErrorKind::TooLate,
                skip_index,
            ));
        }
        let start = (skip_index + 1 - oldest) as usize;
        Ok(self.items[start..].to_vec())
    }

    pub(crate) fn get_item(&self, index: i64) -> Result<&T> {
        let position = self.position(index)?;
        Ok(&self.items[position])
    }

    /// Appends the item that directly follows the last one.
    pub(crate) fn add(&mut self, item: T, index: i64) -> Result<()> {
        if index <= self.last_index {
            return Err(StoreError::new(
                "RollingIndex",
                StoreErrorKind::PassedIndex,
                index,
            ));
        }
        if index > self.last_index + 1 {
            return Err(StoreError::new(
                "RollingIndex",
                StoreErrorKind::SkippedIndex,
                index,
            ));
        }
        if self.items.len() >= 2 * self.size {
            self.roll();
        }
        self.items.push(item);
        self.last_index = index;
        Ok(())
    }

    /// Replaces an item still in the window, or appends it.
    pub(crate) fn set(&mut self, item: T, index: i64) -> Result<()> {
        if index == self.last_index + 1 {
            return self.add(item, index);
        }
        let position = self.position(index)?;
        self.items[position] = item;
        Ok(())
    }

    fn position(&self, index: i64) -> Result<usize> {
        if index > self.last_index || index < 0 {
            return Err(StoreError::new(
                "RollingIndex",
                StoreErrorKind::KeyNotFound,
                index,
            ));
        }
        let oldest = self.oldest_index();
        if index < oldest {
            return Err(StoreError::new(
                "RollingIndex",
                StoreErrorKind::TooLate,
                index,
            ));
        }
        Ok((index - oldest) as usize)
    }

    fn oldest_index(&self) -> i64 {
        self.last_index - self.items.len() as i64 + 1
    }

    fn roll(&mut self) {
        let drop = self.items.len().saturating_sub(self.size);
        self.items.drain(..drop);
    }
}
