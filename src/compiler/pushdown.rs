//! Selection push-down.
//!
//! Readers of a staged statement record the columns they use while the
//! chain is built. Once every reader exists, those columns are pushed into
//! the staged statements: `RETURNING` lists for mutations, the projection
//! for selects. A select that gains a column passes the requirement on to
//! the entry it reads from, so the chain is walked from last to first.

use std::collections::HashMap;

use indexmap::IndexSet;
use tracing::trace;

use super::chain::CteChain;
use crate::sql::statement::Statement;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Required {
    All,
    Columns(IndexSet<String>),
}

/// Columns needed from each staged alias.
#[derive(Debug, Default)]
pub(crate) struct Requirements {
    by_alias: HashMap<String, Required>,
}

impl Requirements {
    pub fn require(&mut self, alias: &str, column: &str) {
        match self
            .by_alias
            .entry(alias.to_string())
            .or_insert_with(|| Required::Columns(IndexSet::new()))
        {
            Required::All => {}
            Required::Columns(columns) => {
                columns.insert(column.to_string());
            }
        }
    }

    pub fn require_all(&mut self, alias: &str) {
        self.by_alias.insert(alias.to_string(), Required::All);
    }

    pub fn get(&self, alias: &str) -> Option<&Required> {
        self.by_alias.get(alias)
    }
}

/// Widen every staged statement to what its readers need.
pub(crate) fn push_down(chain: &mut CteChain, requirements: &mut Requirements) {
    for entry in chain.iter_rev_mut() {
        let Some(required) = requirements.get(&entry.alias).cloned() else {
            continue;
        };
        trace!(alias = %entry.alias, ?required, "push down");
        match &mut entry.statement {
            Statement::Insert(insert) => widen(&mut insert.returning, &required),
            Statement::Update(update) => widen(&mut update.returning, &required),
            Statement::Delete(delete) => widen(&mut delete.returning, &required),
            Statement::Select(select) => {
                let Required::Columns(columns) = required else {
                    continue;
                };
                let Some(qualifier) = entry.qualifier.as_deref() else {
                    continue;
                };
                for column in &columns {
                    if select.is_star() || select.output_names().contains(column.as_str()) {
                        continue;
                    }
                    select.ensure_column(qualifier, column);
                    if let Some(base) = &entry.base {
                        requirements.require(base, column);
                    }
                }
            }
            _ => {}
        }
    }
}

fn widen(returning: &mut crate::sql::dml::Returning, required: &Required) {
    match required {
        Required::All => returning.require_all(),
        Required::Columns(columns) => {
            for column in columns {
                returning.require(column);
            }
        }
    }
}
