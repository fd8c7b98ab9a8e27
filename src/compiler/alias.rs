//! Alias generation for one compilation.

/// Monotonic alias counters. Never reset within a compile.
#[derive(Debug, Default)]
pub(crate) struct Aliases {
    relation: usize,
    lateral: usize,
    aggregate: usize,
    union: usize,
    cte: usize,
    recursive: usize,
    values: usize,
}

fn next(counter: &mut usize, prefix: &str) -> String {
    *counter += 1;
    format!("{}{}", prefix, counter)
}

impl Aliases {
    /// `r1`, `r2`, ... for relations that would shadow an enclosing name.
    pub fn relation(&mut self) -> String {
        next(&mut self.relation, "r")
    }

    /// `j1`, ... for lateral joins.
    pub fn lateral(&mut self) -> String {
        next(&mut self.lateral, "j")
    }

    /// `a1`, ... for rows fed to an aggregate.
    pub fn aggregate(&mut self) -> String {
        next(&mut self.aggregate, "a")
    }

    /// `u1`, ... for unions standing in for a relation.
    pub fn union(&mut self) -> String {
        next(&mut self.union, "u")
    }

    /// `t1`, ... for staged statements.
    pub fn cte(&mut self) -> String {
        next(&mut self.cte, "t")
    }

    /// `c1`, ... for recursive walks.
    pub fn recursive(&mut self) -> String {
        next(&mut self.recursive, "c")
    }

    /// `v1`, ... for literal row sets.
    pub fn values(&mut self) -> String {
        next(&mut self.values, "v")
    }

    /// The bare name, unless an enclosing query already uses it.
    pub fn qualify(&mut self, name: &str, scope: &[String]) -> String {
        if scope.iter().any(|s| s == name) {
            self.relation()
        } else {
            name.to_string()
        }
    }
}
