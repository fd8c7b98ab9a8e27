//! The CTE chain: statements staged ahead of the terminal query.

use crate::model::Relation;
use crate::sql::query::Cte;
use crate::sql::statement::Statement;

/// One staged statement.
#[derive(Debug, Clone)]
pub(crate) struct CteEntry {
    pub alias: String,
    pub statement: Statement,
    /// Shape of the rows this entry produces.
    pub relation: Relation,
    /// Qualifier of the FROM item, for select entries.
    pub qualifier: Option<String>,
    /// The staged entry a select reads from, if any.
    pub base: Option<String>,
}

/// Ordered, append-only. Later entries may read earlier ones by alias.
#[derive(Debug, Default)]
pub(crate) struct CteChain {
    entries: Vec<CteEntry>,
}

impl CteChain {
    pub fn push(&mut self, entry: CteEntry) {
        self.entries.push(entry);
    }

    pub fn get(&self, alias: &str) -> Option<&CteEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from last to first, so readers are visited before what they read.
    pub fn iter_rev_mut(&mut self) -> impl Iterator<Item = &mut CteEntry> {
        self.entries.iter_mut().rev()
    }

    pub fn into_ctes(self) -> Vec<Cte> {
        self.entries
            .into_iter()
            .map(|e| Cte::new(&e.alias, e.statement))
            .collect()
    }
}
