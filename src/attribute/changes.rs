use crate::core::types::{ArithOp, Lid, WeightOp};

/// Default bound for `commit_if_change_vector_too_large`: any bound that
/// preserves commit monotonicity is acceptable, this one counts entries.
pub const DEFAULT_CHANGE_VECTOR_LIMIT: usize = 128 * 1024;

/// One buffered mutation, applied at commit time.
#[derive(Debug, Clone)]
pub enum ChangeOp<V> {
    Assign(V),
    AssignMulti(Vec<(V, i32)>),
    Clear,
    Arith(ArithOp, f64),
    Append { value: V, weight: i32 },
    Remove(V),
    AdjustWeight { value: V, op: WeightOp },
}

#[derive(Debug, Clone)]
pub struct Change<V> {
    pub lid: Lid,
    pub op: ChangeOp<V>,
}

/// Per-vector queue buffering incoming operations until commit. Mutated only
/// from the vector's lane; the owning vector wraps it in a mutex.
#[derive(Debug)]
pub struct ChangeVector<V> {
    changes: Vec<Change<V>>,
    limit: usize,
}

impl<V> ChangeVector<V> {
    pub fn new() -> Self {
        ChangeVector { changes: Vec::new(), limit: DEFAULT_CHANGE_VECTOR_LIMIT }
    }

    pub fn push(&mut self, lid: Lid, op: ChangeOp<V>) {
        self.changes.push(Change { lid, op });
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn too_large(&self) -> bool {
        self.changes.len() >= self.limit
    }

    /// Drains the queue in submission order.
    pub fn take(&mut self) -> Vec<Change<V>> {
        std::mem::take(&mut self.changes)
    }

    /// Highest lid touched by the queued changes, if any.
    pub fn highest_lid(&self) -> Option<Lid> {
        self.changes.iter().map(|c| c.lid).max()
    }
}

impl<V> Default for ChangeVector<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies one weighted-set style change to an entry list, honoring the
/// collection flags. Entries keep first-insertion order.
pub fn apply_wset_append<V: PartialEq + Clone>(
    entries: &mut Vec<(V, i32)>,
    value: &V,
    weight: i32,
    create_if_nonexistent: bool,
    remove_if_zero: bool,
) {
    let pos = entries.iter().position(|(v, _)| v == value);
    match pos {
        Some(idx) => {
            if create_if_nonexistent {
                entries[idx].1 += weight;
            } else {
                entries[idx].1 = weight;
            }
            if remove_if_zero && entries[idx].1 == 0 {
                entries.remove(idx);
            }
        }
        None => {
            if remove_if_zero && weight == 0 {
                return;
            }
            entries.push((value.clone(), weight));
        }
    }
}

pub fn apply_weight_op<V: PartialEq>(
    entries: &mut Vec<(V, i32)>,
    value: &V,
    op: WeightOp,
    remove_if_zero: bool,
) {
    if let Some(idx) = entries.iter().position(|(v, _)| v == value) {
        let w = &mut entries[idx].1;
        match op {
            WeightOp::Increase(d) => *w += d,
            WeightOp::Mul(m) => *w *= m,
            WeightOp::Div(d) => {
                if d != 0 {
                    *w /= d;
                }
            }
            WeightOp::Set(v) => *w = v,
        }
        if remove_if_zero && entries[idx].1 == 0 {
            entries.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wset_append_flag_combinations() {
        let mut entries: Vec<(i32, i32)> = Vec::new();
        apply_wset_append(&mut entries, &7, 5, true, true);
        assert_eq!(entries, vec![(7, 5)]);
        // create_if_nonexistent adds to an existing weight
        apply_wset_append(&mut entries, &7, 3, true, true);
        assert_eq!(entries, vec![(7, 8)]);
        // without the create flag the weight is replaced
        apply_wset_append(&mut entries, &7, 2, false, false);
        assert_eq!(entries, vec![(7, 2)]);
        // zero weight with remove_if_zero removes
        apply_wset_append(&mut entries, &7, -2, true, true);
        assert_eq!(entries, Vec::new());
        // appending zero into a remove_if_zero set is a no-op
        apply_wset_append(&mut entries, &9, 0, true, true);
        assert_eq!(entries, Vec::new());
    }

    #[test]
    fn weight_ops() {
        let mut entries = vec![("a".to_string(), 6)];
        apply_weight_op(&mut entries, &"a".to_string(), WeightOp::Mul(2), false);
        assert_eq!(entries[0].1, 12);
        apply_weight_op(&mut entries, &"a".to_string(), WeightOp::Div(4), false);
        assert_eq!(entries[0].1, 3);
        // integer divide by zero leaves the weight untouched
        apply_weight_op(&mut entries, &"a".to_string(), WeightOp::Div(0), false);
        assert_eq!(entries[0].1, 3);
        apply_weight_op(&mut entries, &"a".to_string(), WeightOp::Set(0), true);
        assert!(entries.is_empty());
    }
}
