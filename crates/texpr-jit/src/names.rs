//! Unique function names for repeated compilations of one logical kernel.

use std::sync::LazyLock;

use fxhash::FxHashMap;
use parking_lot::Mutex;

/// Hands out collision-free variants of logical names.
///
/// The first request for `k` returns `k`; later requests return `k_1`,
/// `k_2`, ... Counters only grow and are never removed.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counters: Mutex<FxHashMap<String, u64>>,
}

impl NameAllocator {
    /// Creates an allocator with no names issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unique variant of `name`.
    pub fn allocate(&self, name: &str) -> String {
        let mut counters = self.counters.lock();
        match counters.get_mut(name) {
            None => {
                counters.insert(name.to_string(), 0);
                name.to_string()
            }
            Some(count) => {
                *count += 1;
                format!("{name}_{count}")
            }
        }
    }

    /// Number of distinct logical names seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Returns `true` if no name was ever allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static NAMES: LazyLock<NameAllocator> = LazyLock::new(NameAllocator::new);

/// Allocates from the process-wide allocator.
pub fn unique_function_name(name: &str) -> String {
    NAMES.allocate(name)
}
