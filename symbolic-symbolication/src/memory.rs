use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use symbolic_breakpad::SymbolTable;
use symbolic_common::ModuleRef;

/// A bounded cache of parsed symbol tables, evicting the least recently used table.
///
/// Entries are kept in an [`IndexMap`] in order of use, the most recently used table last. A
/// capacity of zero disables caching.
#[derive(Debug)]
pub(crate) struct TableCache {
    capacity: usize,
    tables: Mutex<IndexMap<ModuleRef, Arc<SymbolTable>>>,
}

impl TableCache {
    pub fn new(capacity: usize) -> Self {
        TableCache {
            capacity,
            tables: Mutex::new(IndexMap::new()),
        }
    }

    pub fn get(&self, module: &ModuleRef) -> Option<Arc<SymbolTable>> {
        let mut tables = self.tables.lock();
        let index = tables.get_index_of(module)?;
        let last = tables.len() - 1;
        tables.move_index(index, last);
        tables.get_index(last).map(|(_, table)| Arc::clone(table))
    }

    pub fn insert(&self, module: ModuleRef, table: Arc<SymbolTable>) {
        if self.capacity == 0 {
            return;
        }

        let mut tables = self.tables.lock();
        let (index, _) = tables.insert_full(module, table);
        let last = tables.len() - 1;
        tables.move_index(index, last);

        while tables.len() > self.capacity {
            tables.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}
