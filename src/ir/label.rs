//! Label allocation, naming and alias unification.

use crate::entities::LabelId;
use cranelift_entity::{EntityRef, PrimaryMap};

/// One label record. Two ids can be unified into aliases of each other by
/// [`LabelTable::alias`]; the non-surviving id's record is left in the
/// arena (so old `LabelId` handles stay valid) but marked `is_alias` and
/// redirected to the surviving id.
#[derive(Clone, Debug, Default)]
struct LabelRecord {
    name: Option<String>,
    global: bool,
    is_alias: bool,
    alias_of: Option<LabelId>,
}

/// Owns every label a [`crate::ir::Program`] has created.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    records: PrimaryMap<LabelId, LabelRecord>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh, unnamed, non-global label id.
    pub fn create(&mut self) -> LabelId {
        self.records.push(LabelRecord::default())
    }

    /// Follow the alias chain to the canonical surviving id.
    pub fn resolve(&self, id: LabelId) -> LabelId {
        let mut cur = id;
        while let Some(next) = self.records[cur].alias_of {
            cur = next;
        }
        cur
    }

    pub fn is_alias(&self, id: LabelId) -> bool {
        self.records[id].is_alias
    }

    pub fn is_global(&self, id: LabelId) -> bool {
        self.records[self.resolve(id)].global
    }

    pub fn set_global(&mut self, id: LabelId, global: bool) {
        let canon = self.resolve(id);
        self.records[canon].global = global;
    }

    pub fn explicit_name(&self, id: LabelId) -> Option<&str> {
        self.records[self.resolve(id)].name.as_deref()
    }

    /// The label's printable name: its explicit name, or a synthesized
    /// `l_<id>` using the *canonical* id (matching the historical
    /// `getLabelName` fallback).
    pub fn name(&self, id: LabelId) -> String {
        let canon = self.resolve(id);
        match &self.records[canon].name {
            Some(n) => n.clone(),
            None => format!("l_{}", canon.index()),
        }
    }

    /// Sanitize `name` to `[A-Za-z0-9_]`, disambiguate against every other
    /// label's current name by appending `_0`, `_1`, ... until unique, and
    /// assign the result to `id`'s canonical record.
    pub fn set_name(&mut self, id: LabelId, name: &str) {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let canon = self.resolve(id);
        let unique = self.make_unique(&sanitized, canon);
        self.records[canon].name = Some(unique);
    }

    fn make_unique(&self, base: &str, exclude: LabelId) -> String {
        let collides = |candidate: &str| {
            self.records.keys().any(|other| {
                other != exclude
                    && !self.records[other].is_alias
                    && self.records[other].name.as_deref() == Some(candidate)
            })
        };
        if !collides(base) {
            return base.to_string();
        }
        for n in 0.. {
            let candidate = format!("{base}_{n}");
            if !collides(&candidate) {
                return candidate;
            }
        }
        unreachable!()
    }

    /// Unify `pending` and `new` into aliases of the same program point.
    /// `pending`'s id always survives (matching the historical
    /// `assignLabel`, which keeps the pending label's record and folds the
    /// freshly-created one into it, rather than literally picking whichever
    /// id is numerically lowest). Name preference does use the lowest-id
    /// tiebreak when both aliased labels already have an explicit name.
    /// Returns the surviving id.
    pub fn alias(&mut self, pending: LabelId, new: LabelId) -> LabelId {
        let p = self.resolve(pending);
        let n = self.resolve(new);
        if p == n {
            return p;
        }
        let name = match (&self.records[p].name, &self.records[n].name) {
            (Some(pn), Some(nn)) => Some(if p.index() <= n.index() { pn.clone() } else { nn.clone() }),
            (Some(pn), None) => Some(pn.clone()),
            (None, Some(nn)) => Some(nn.clone()),
            (None, None) => None,
        };
        let global = self.records[p].global || self.records[n].global;
        self.records[n].is_alias = true;
        self.records[n].alias_of = Some(p);
        self.records[p].name = name;
        self.records[p].global = global;
        p
    }

    /// Iterate every non-alias label id, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.records
            .keys()
            .filter(move |&id| !self.records[id].is_alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliasing_keeps_pending_id_and_unifies_flags() {
        let mut t = LabelTable::new();
        let pending = t.create();
        t.set_global(pending, true);
        let new = t.create();
        t.set_name(new, "loop");
        let survivor = t.alias(pending, new);
        assert_eq!(survivor, pending);
        assert!(t.is_alias(new));
        assert_eq!(t.resolve(new), pending);
        assert!(t.is_global(pending));
        assert_eq!(t.explicit_name(pending), Some("loop"));
    }

    #[test]
    fn names_are_sanitised_and_disambiguated() {
        let mut t = LabelTable::new();
        let a = t.create();
        t.set_name(a, "my label!");
        assert_eq!(t.name(a), "my_label_");
        let b = t.create();
        t.set_name(b, "my label!");
        assert_eq!(t.name(b), "my_label__0");
    }

    #[test]
    fn unnamed_labels_synthesize_from_canonical_id() {
        let mut t = LabelTable::new();
        let a = t.create();
        assert_eq!(t.name(a), format!("l_{}", a.index()));
    }
}
