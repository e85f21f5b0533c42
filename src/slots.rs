//! Fixed-capacity slot table shared by the link and stream registries.
//!
//! Allocation and lookup are both linear scans. At 256 slots this is cheap
//! enough, and a linear scan gives us the exact "first empty slot" / "first
//! matching slot in index order" semantics the relay's tie-break rules rely
//! on without reaching for a `HashMap` and an auxiliary free-list.

/// A table of `N` slots of `T`, each either empty (`None`) or occupied.
pub struct SlotTable<T, const N: usize> {
    slots: Box<[Option<T>; N]>,
}

impl<T, const N: usize> SlotTable<T, N> {
    pub fn new() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Index of the first empty slot, if any.
    pub fn find_empty(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Inserts `value` into the first empty slot and returns its index.
    /// Returns `value` back unmodified if the table is full.
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        match self.find_empty() {
            Some(idx) => {
                self.slots[idx] = Some(value);
                Ok(idx)
            }
            None => Err(value),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots[idx].as_mut()
    }

    /// Removes and returns the value at `idx`, leaving the slot empty.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        self.slots[idx].take()
    }

    /// Reinserts a value at a specific, previously-emptied index. Used by
    /// the relay's remove-mutate-reinsert pattern so a slot's index stays
    /// stable across a single dispatch.
    pub fn put_back(&mut self, idx: usize, value: T) {
        debug_assert!(self.slots[idx].is_none(), "put_back into an occupied slot");
        self.slots[idx] = Some(value);
    }

    /// Finds the index of the first occupied slot for which `pred` holds,
    /// in ascending slot-index order.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots.iter().position(|slot| slot.as_ref().is_some_and(&mut pred))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|v| (idx, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|v| (idx, v)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, const N: usize> Default for SlotTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
