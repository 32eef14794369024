use std::collections::HashMap;

/// Monotonically increasing id assigned by the transaction log.
/// Every durable mutation carries one.
pub type SerialNum = u64;

/// Local document id, dense within a sub-database. Lid 0 is reserved
/// and never holds a user document.
pub type Lid = u32;

pub const RESERVED_LID: Lid = 0;

/// Dense id handed out by an enum store for a unique value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(pub u32);

impl EnumId {
    pub const INVALID: EnumId = EnumId(u32::MAX);

    pub fn valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

/// One field value as extracted from a document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Array collection: duplicates allowed, order preserved.
    Array(Vec<FieldValue>),
    /// Weighted set collection: (value, weight) pairs.
    WeightedSet(Vec<(FieldValue, i32)>),
    /// Dense tensor cells.
    Tensor(Vec<f32>),
    /// Serialized predicate expression.
    Predicate(String),
    /// Reference to a document in another document type.
    Reference(String),
    /// Nested struct, addressed through dotted field paths.
    Struct(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(*v as i64 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::Reference(s) => Some(s),
            FieldValue::Predicate(s) => Some(s),
            _ => None,
        }
    }
}

/// A document as seen by the attribute subsystem: a bag of extracted fields.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: HashMap::new() }
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Resolves a dotted field path ("person.age") through nested structs.
    /// Returns None both for a missing field and for a path the document
    /// model cannot express; the caller maps that to the undefined sentinel.
    pub fn get_field_path(&self, path: &str) -> Option<&FieldValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            match current {
                FieldValue::Struct(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

/// Arithmetic applied by an update operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Weight adjustment for one weighted-set element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightOp {
    Increase(i32),
    Mul(i32),
    Div(i32),
    Set(i32),
}

/// One update primitive inside a field update.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueUpdate {
    Assign(FieldValue),
    Clear,
    Arithmetic(ArithOp, f64),
    /// Add entries to a multi-value collection.
    Add(Vec<(FieldValue, i32)>),
    /// Remove entries from a multi-value collection.
    Remove(Vec<FieldValue>),
    AdjustWeight(FieldValue, WeightOp),
}

#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub field: String,
    pub updates: Vec<ValueUpdate>,
}

impl FieldUpdate {
    pub fn new(field: impl Into<String>) -> Self {
        FieldUpdate { field: field.into(), updates: Vec::new() }
    }

    pub fn push(mut self, upd: ValueUpdate) -> Self {
        self.updates.push(upd);
        self
    }

    /// True for an update carrying exactly one assign with a value; such
    /// updates may be routed through the two-phase put path.
    pub fn is_single_assign(&self) -> bool {
        matches!(self.updates.as_slice(), [ValueUpdate::Assign(_)])
    }

    pub fn single_assign_value(&self) -> Option<&FieldValue> {
        match self.updates.as_slice() {
            [ValueUpdate::Assign(v)] => Some(v),
            _ => None,
        }
    }
}

/// A partial-update document: field updates applied to one lid.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub field_updates: Vec<FieldUpdate>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        DocumentUpdate { field_updates: Vec::new() }
    }

    pub fn push(mut self, upd: FieldUpdate) -> Self {
        self.field_updates.push(upd);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_resolution() {
        let mut inner = HashMap::new();
        inner.insert("age".to_string(), FieldValue::Int(42));
        let mut doc = Document::new();
        doc.set_field("person", FieldValue::Struct(inner));
        doc.set_field("title", FieldValue::Str("hello".into()));

        assert_eq!(doc.get_field_path("person.age"), Some(&FieldValue::Int(42)));
        assert_eq!(doc.get_field_path("title"), Some(&FieldValue::Str("hello".into())));
        assert_eq!(doc.get_field_path("person.name"), None);
        // Path through a non-struct is unsupported, not an error
        assert_eq!(doc.get_field_path("title.sub"), None);
    }

    #[test]
    fn single_assign_detection() {
        let upd = FieldUpdate::new("f").push(ValueUpdate::Assign(FieldValue::Int(1)));
        assert!(upd.is_single_assign());
        let upd = FieldUpdate::new("f")
            .push(ValueUpdate::Assign(FieldValue::Int(1)))
            .push(ValueUpdate::Clear);
        assert!(!upd.is_single_assign());
    }
}
