use parking_lot::Mutex;
use std::sync::Arc;

use crate::attribute::changes::{ChangeOp, ChangeVector};
use crate::attribute::value_store::{ValueBuffer, ValueStore};
use crate::attribute::{
    AttributeBase, AttributeReadGuard, AttributeVector, ClosureReadGuard, CommitParam,
};
use crate::core::config::{AttributeConfig, BasicType};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ArithOp, FieldValue, Lid, ValueUpdate};
use crate::search::context::{ScanSearchContext, SearchContext};
use crate::search::term::{SearchParams, parse_bool_term, parse_numeric_term};
use crate::storage::save::{AttributeHeader, SnapshotData};

const WORD_BITS: u32 = 32;

/// Single-value attribute for bool, uint2 and uint4: values bit-packed into
/// 32-bit words, one atomic word per load/store.
pub struct SingleSmallNumericAttribute {
    base: AttributeBase,
    words: ValueStore<u32>,
    changes: Mutex<ChangeVector<u8>>,
    bits_per_value: u32,
    value_mask: u32,
}

fn bits_for(basic_type: BasicType) -> u32 {
    match basic_type {
        BasicType::Bool => 1,
        BasicType::UInt2 => 2,
        BasicType::UInt4 => 4,
        _ => unreachable!("not a small numeric type"),
    }
}

fn words_for_docs(docs: u32, bits: u32) -> u32 {
    let values_per_word = WORD_BITS / bits;
    docs.div_ceil(values_per_word).max(1)
}

fn read_bits(view: &ValueBuffer<u32>, lid: Lid, bits: u32, mask: u32) -> Option<u8> {
    let values_per_word = WORD_BITS / bits;
    let word = view.get(lid / values_per_word)?;
    let shift = (lid % values_per_word) * bits;
    Some(((word >> shift) & mask) as u8)
}

impl SingleSmallNumericAttribute {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        let bits_per_value = bits_for(config.basic_type);
        let grow = config.grow;
        SingleSmallNumericAttribute {
            base: AttributeBase::new(name, config),
            words: ValueStore::new(grow),
            changes: Mutex::new(ChangeVector::new()),
            bits_per_value,
            value_mask: (1u32 << bits_per_value) - 1,
        }
    }

    fn is_bool(&self) -> bool {
        self.bits_per_value == 1
    }

    fn convert(&self, value: &FieldValue) -> Result<u8> {
        let raw = value.as_i64().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("value {:?} not assignable to attribute '{}'", value, self.base.name()),
            )
        })?;
        Ok((raw as u32 & self.value_mask) as u8)
    }

    fn write_bits(&self, lid: Lid, value: u8) {
        let values_per_word = WORD_BITS / self.bits_per_value;
        let word_idx = lid / values_per_word;
        let shift = (lid % values_per_word) * self.bits_per_value;
        let old = self.words.load(word_idx);
        let cleared = old & !(self.value_mask << shift);
        self.words.store(word_idx, cleared | ((value as u32 & self.value_mask) << shift));
    }

    fn load_bits(&self, lid: Lid) -> u8 {
        read_bits(&self.words.view(), lid, self.bits_per_value, self.value_mask).unwrap_or(0)
    }

    fn do_commit(&self, param: CommitParam) {
        if !self.base.commit_gate(&param) {
            return;
        }
        let changes = self.changes.lock().take();
        for change in changes {
            match change.op {
                ChangeOp::Assign(v) => self.write_bits(change.lid, v),
                ChangeOp::Clear => self.write_bits(change.lid, 0),
                ChangeOp::Arith(op, operand) => {
                    if op == ArithOp::Div && operand == 0.0 {
                        self.base.note_divide_by_zero();
                        continue;
                    }
                    let current = self.load_bits(change.lid) as f64;
                    let next = match op {
                        ArithOp::Add => current + operand,
                        ArithOp::Sub => current - operand,
                        ArithOp::Mul => current * operand,
                        ArithOp::Div => current / operand,
                    };
                    self.write_bits(change.lid, (next.max(0.0) as u32 & self.value_mask) as u8);
                }
                _ => {}
            }
        }
        self.base.finish_commit(&param);
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SmallNumericPayload {
    bits_per_value: u32,
    docid_limit: u32,
    words: Vec<u32>,
}

impl AttributeVector for SingleSmallNumericAttribute {
    fn base(&self) -> &AttributeBase {
        &self.base
    }

    fn add_doc(&self) -> Result<Lid> {
        let lid = self.base.alloc_lid();
        self.words
            .ensure_capacity(words_for_docs(lid + 1, self.bits_per_value), self.base.generations());
        Ok(lid)
    }

    fn put(&self, lid: Lid, value: &FieldValue) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        let v = self.convert(value)?;
        self.changes.lock().push(lid, ChangeOp::Assign(v));
        Ok(())
    }

    fn append(&self, _lid: Lid, _value: &FieldValue, _weight: i32) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "append on single-value attribute"))
    }

    fn remove_value(&self, _lid: Lid, _value: &FieldValue) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidArgument, "remove on single-value attribute"))
    }

    fn apply_update(&self, lid: Lid, update: &ValueUpdate) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        match update {
            ValueUpdate::Assign(v) => self.put(lid, v),
            ValueUpdate::Clear => self.clear_doc(lid),
            ValueUpdate::Arithmetic(op, operand) => {
                self.changes.lock().push(lid, ChangeOp::Arith(*op, *operand));
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "collection update on single-value attribute",
            )),
        }
    }

    fn clear_doc(&self, lid: Lid) -> Result<()> {
        self.base.check_writable_lid(lid)?;
        self.changes.lock().push(lid, ChangeOp::Clear);
        Ok(())
    }

    fn commit(&self, param: CommitParam) {
        self.do_commit(param);
    }

    fn commit_if_change_vector_too_large(&self) {
        if self.changes.lock().too_large() {
            self.do_commit(CommitParam::internal());
        }
    }

    fn compact_lid_space(&self, limit: u32) {
        if limit >= self.base.committed_docid_limit() {
            return;
        }
        for lid in limit..self.base.committed_docid_limit() {
            self.write_bits(lid, 0);
        }
        self.base.set_lid_space(limit);
    }

    fn shrink_lid_space(&self) {
        self.words.shrink(
            words_for_docs(self.base.committed_docid_limit(), self.bits_per_value),
            self.base.generations(),
        );
        self.base.clear_compacted_flag();
    }

    fn get(&self, lid: Lid) -> FieldValue {
        let v = self.load_bits(lid);
        if self.is_bool() {
            FieldValue::Bool(v != 0)
        } else {
            FieldValue::Int(v as i64)
        }
    }

    fn get_multi(&self, lid: Lid) -> Vec<(FieldValue, i32)> {
        vec![(self.get(lid), 1)]
    }

    fn make_read_guard(&self, _stable_enum: bool) -> Box<dyn AttributeReadGuard> {
        let guard = self.base.generations().take_guard();
        let view = self.words.view();
        let bits = self.bits_per_value;
        let mask = self.value_mask;
        let is_bool = self.is_bool();
        let view2 = Arc::clone(&view);
        let to_value = move |view: &ValueBuffer<u32>, lid: Lid| {
            let v = read_bits(view, lid, bits, mask).unwrap_or(0);
            if is_bool { FieldValue::Bool(v != 0) } else { FieldValue::Int(v as i64) }
        };
        let to_value2 = to_value;
        Box::new(ClosureReadGuard::new(
            guard,
            self.base.committed_docid_limit(),
            Box::new(move |lid| to_value(&view, lid)),
            Box::new(move |lid| vec![(to_value2(&view2, lid), 1)]),
        ))
    }

    fn create_search_context(
        &self,
        term: &str,
        _params: &SearchParams,
    ) -> Result<Box<dyn SearchContext>> {
        let docid_limit = self.base.committed_docid_limit();
        let view = self.words.view();
        let bits = self.bits_per_value;
        let mask = self.value_mask;
        if self.is_bool() {
            // "1"/"true" match the set bits; the false case runs the same
            // scan with the sense inverted.
            let want = parse_bool_term(term)?;
            let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
                let set = read_bits(&view, lid, bits, mask).unwrap_or(0) != 0;
                (set == want, 1)
            });
            return Ok(Box::new(ScanSearchContext::new(docid_limit, matcher)));
        }
        let range = parse_numeric_term(term)?;
        let match_range = range.clone();
        let matcher: crate::search::context::LidMatcher = Arc::new(move |lid| {
            match read_bits(&view, lid, bits, mask) {
                Some(v) => (match_range.contains_i64(v as i64), 1),
                None => (false, 0),
            }
        });
        Ok(Box::new(
            ScanSearchContext::new(docid_limit, matcher).with_range_limit(range.range_limit),
        ))
    }

    fn save_snapshot(&self) -> Result<SnapshotData> {
        let limit = self.base.committed_docid_limit();
        let view = self.words.view();
        let word_count = words_for_docs(limit, self.bits_per_value);
        let words: Vec<u32> = (0..word_count).map(|i| view.get(i).unwrap_or(0)).collect();
        let config = self.base.config();
        let header = AttributeHeader {
            name: self.base.name().to_string(),
            basic_type: config.basic_type,
            collection: config.collection,
            tensor_type: None,
            predicate_params: None,
            create_serial: self.base.create_serial(),
            docid_limit: limit,
        };
        let payload = bincode::serialize(&SmallNumericPayload {
            bits_per_value: self.bits_per_value,
            docid_limit: limit,
            words,
        })?;
        Ok(SnapshotData { header, payload })
    }

    fn load_snapshot(&self, data: &SnapshotData) -> Result<()> {
        let payload: SmallNumericPayload = bincode::deserialize(&data.payload)?;
        if payload.bits_per_value != self.bits_per_value {
            return Err(Error::new(
                ErrorKind::Config,
                format!(
                    "snapshot of '{}' packs {} bits per value, expected {}",
                    self.base.name(),
                    payload.bits_per_value,
                    self.bits_per_value
                ),
            ));
        }
        self.words
            .ensure_capacity(payload.words.len().max(1) as u32, self.base.generations());
        for (idx, word) in payload.words.iter().enumerate() {
            self.words.store(idx as u32, *word);
        }
        self.base.set_create_serial(data.header.create_serial);
        self.base.set_loaded_lid_space(payload.docid_limit);
        Ok(())
    }

    fn estimated_save_bytes(&self) -> u64 {
        (words_for_docs(self.base.committed_docid_limit(), self.bits_per_value) as u64) * 4 + 256
    }

    fn memory_used(&self) -> usize {
        self.words.memory_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::iterator::collect_hits;

    fn bool_attr() -> SingleSmallNumericAttribute {
        let attr = SingleSmallNumericAttribute::new(
            "flag",
            AttributeConfig::single(BasicType::Bool),
        );
        attr.add_doc().unwrap();
        attr.commit(CommitParam::internal());
        attr
    }

    #[test]
    fn bool_put_and_search_both_senses() {
        let attr = bool_attr();
        for _ in 0..4 {
            attr.add_doc().unwrap();
        }
        attr.put(1, &FieldValue::Bool(true)).unwrap();
        attr.put(3, &FieldValue::Bool(true)).unwrap();
        attr.commit(CommitParam::new(1));
        assert_eq!(attr.get(1), FieldValue::Bool(true));
        assert_eq!(attr.get(2), FieldValue::Bool(false));

        for term in ["1", "true", "TRUE"] {
            let ctx = attr.create_search_context(term, &SearchParams::default()).unwrap();
            let mut it = ctx.create_iterator(true);
            assert_eq!(collect_hits(it.as_mut(), 5), vec![1, 3]);
        }
        for term in ["0", "false"] {
            let ctx = attr.create_search_context(term, &SearchParams::default()).unwrap();
            let mut it = ctx.create_iterator(true);
            assert_eq!(collect_hits(it.as_mut(), 5), vec![2, 4]);
        }
        assert!(attr.create_search_context("maybe", &SearchParams::default()).is_err());
    }

    #[test]
    fn uint4_masks_and_matches_ranges() {
        let attr = SingleSmallNumericAttribute::new(
            "nibble",
            AttributeConfig::single(BasicType::UInt4),
        );
        for _ in 0..20 {
            attr.add_doc().unwrap();
        }
        for lid in 1..20u32 {
            attr.put(lid, &FieldValue::Int((lid % 16) as i64)).unwrap();
        }
        attr.commit(CommitParam::new(1));
        assert_eq!(attr.get(5), FieldValue::Int(5));
        assert_eq!(attr.get(17), FieldValue::Int(1));
        let ctx = attr.create_search_context("[3;4]", &SearchParams::default()).unwrap();
        let mut it = ctx.create_iterator(true);
        assert_eq!(collect_hits(it.as_mut(), 20), vec![3, 4, 19]);
    }

    #[test]
    fn small_numeric_snapshot_round_trip() {
        let attr = bool_attr();
        for _ in 0..40 {
            attr.add_doc().unwrap();
        }
        attr.put(33, &FieldValue::Bool(true)).unwrap();
        attr.commit(CommitParam::new(2));
        let snap = attr.save_snapshot().unwrap();
        let restored = bool_attr();
        restored.load_snapshot(&snap).unwrap();
        assert_eq!(restored.get(33), FieldValue::Bool(true));
        assert_eq!(restored.get(32), FieldValue::Bool(false));
        assert_eq!(restored.base().committed_docid_limit(), 41);
    }
}
