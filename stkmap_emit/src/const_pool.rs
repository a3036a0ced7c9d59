use indexmap::IndexSet;

/// Large constants referenced by index from call site locations. Indices follow first
/// insertion order, which is also the order they're written out in.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    // stored as raw bits, so the order of negative and positive values doesn't matter
    values: IndexSet<u64>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `value`, adding it if it isn't pooled yet.
    pub fn insert(&mut self, value: i64) -> usize {
        self.values.insert_full(value as u64).0
    }

    pub fn index_of(&self, value: i64) -> Option<usize> {
        self.values.get_full(&(value as u64)).map(|(idx, _)| idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.values.iter().map(|v| *v as i64)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Whether a constant fits the 32 bit offset field directly. Anything else goes to the pool.
pub fn fits_inline(value: i64) -> bool {
    i32::try_from(value).is_ok()
}
