//! Record shapes: named field layouts, their flat serialized form, and the
//! registry that owns them.
//!
//! A [`Shape`] is built incrementally (via the emit-time `NEW_SHAPE`/
//! `DEF_FIELD`/`DEF_STRUCT_FIELD` opcodes, or directly by Rust callers
//! setting up a registry before assembling) and becomes immutable once
//! [`ShapeRegistry::add`] serializes and stores it — shapes cannot be
//! redefined.

use crate::error::VmFault;
use crate::value::Val;
use indexmap::IndexMap;
use shapevm_symtab::Sym;

/// The scalar (or record) kind of a field slot. `None` is the sentinel
/// meaning "no such field" — returned by lookups that fail rather than
/// panicking, since "is this field present" is a normal question an
/// assembler directive asks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    None,
    Bool,
    Symbol,
    Int,
    Uint,
    Real,
    Struct,
}

/// Layout information for one field: its kind, the nested shape it refers
/// to (only meaningful for `Kind::Struct`), and the flat slot range
/// `[ix_from, ix_to)` it occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub kind: Kind,
    pub nested_shape: Option<Sym>,
    pub ix_from: usize,
    pub ix_to: usize,
}

impl Kind {
    /// Encodes a `Kind` as the `u64` carried by a `Val`, so `DEF_FIELD` can
    /// pop a kind tag off the operand stack the same way it pops anything
    /// else.
    pub fn to_u64(self) -> u64 {
        match self {
            Kind::None => 0,
            Kind::Bool => 1,
            Kind::Symbol => 2,
            Kind::Int => 3,
            Kind::Uint => 4,
            Kind::Real => 5,
            Kind::Struct => 6,
        }
    }

    pub fn from_u64(tag: u64) -> Option<Kind> {
        Some(match tag {
            0 => Kind::None,
            1 => Kind::Bool,
            2 => Kind::Symbol,
            3 => Kind::Int,
            4 => Kind::Uint,
            5 => Kind::Real,
            6 => Kind::Struct,
            _ => return None,
        })
    }

    pub fn to_val(self) -> Val {
        Val::from_uint(self.to_u64())
    }

    pub fn from_val(v: Val) -> Option<Kind> {
        Kind::from_u64(v.as_uint())
    }
}

impl TypeInfo {
    /// The sentinel returned for "no such field": an inverted, empty range.
    pub const MISSING: TypeInfo = TypeInfo {
        kind: Kind::None,
        nested_shape: None,
        ix_from: 1,
        ix_to: 0,
    };

    pub fn is_missing(&self) -> bool {
        self.kind == Kind::None
    }
}

/// A record layout: an ordered map from field name to [`TypeInfo`], plus
/// the running slot total and (once added to a registry) the flattened
/// per-slot kind vector.
#[derive(Clone, Debug, Default)]
pub struct Shape {
    fields: IndexMap<Sym, TypeInfo>,
    n_fields: usize,
    serialized: Vec<Kind>,
}

impl Shape {
    /// An empty shape, ready for `add_field`/`add_struct_field` — the
    /// scratch shape the `NEW_SHAPE` opcode resets to.
    pub fn new() -> Shape {
        Shape::default()
    }

    /// Appends a scalar field. `kind` must not be `Kind::Struct` — use
    /// [`Shape::add_struct_field`] for nested records.
    pub fn add_field(&mut self, name: Sym, kind: Kind) {
        debug_assert_ne!(kind, Kind::Struct, "use add_struct_field for nested shapes");
        let ix_from = self.n_fields;
        let ix_to = ix_from + 1;
        self.fields.insert(
            name,
            TypeInfo {
                kind,
                nested_shape: None,
                ix_from,
                ix_to,
            },
        );
        self.n_fields = ix_to;
    }

    /// Appends a nested-record field occupying `nested_size` slots. The
    /// nested shape must already be registered; its size is passed in by
    /// the caller (typically `ShapeRegistry::size`).
    pub fn add_struct_field(&mut self, name: Sym, nested_shape: Sym, nested_size: usize) {
        let ix_from = self.n_fields;
        let ix_to = ix_from + nested_size;
        self.fields.insert(
            name,
            TypeInfo {
                kind: Kind::Struct,
                nested_shape: Some(nested_shape),
                ix_from,
                ix_to,
            },
        );
        self.n_fields = ix_to;
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    pub fn field(&self, name: Sym) -> TypeInfo {
        self.fields.get(&name).copied().unwrap_or(TypeInfo::MISSING)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Sym, &TypeInfo)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// The flattened per-slot kind vector. Empty until the shape has been
    /// added to a [`ShapeRegistry`].
    pub fn serialized(&self) -> &[Kind] {
        &self.serialized
    }
}

/// Owns every registered [`Shape`] and assigns/serializes them on insert.
#[derive(Default)]
pub struct ShapeRegistry {
    shapes: std::collections::HashMap<Sym, Shape>,
}

impl ShapeRegistry {
    pub fn new() -> ShapeRegistry {
        ShapeRegistry::default()
    }

    /// Registers `shape` under `name`, computing its serialized layout.
    /// Fails if `name` is already registered — shapes are immutable once
    /// added.
    pub fn add(&mut self, name: Sym, mut shape: Shape) -> Result<(), VmFault> {
        if self.shapes.contains_key(&name) {
            return Err(VmFault::DuplicateShape(name));
        }
        shape.serialized = self.serialize(&shape)?;
        log::debug!(
            "registered shape (symbol id {:?}) with {} field(s), {} slot(s)",
            name,
            shape.fields.len(),
            shape.n_fields
        );
        self.shapes.insert(name, shape);
        Ok(())
    }

    /// Recursively flattens `shape`'s fields into a per-slot kind vector:
    /// scalar fields contribute one `Kind` at their slot, nested-record
    /// fields contribute their own (already-registered) serialization at
    /// `ix_from`. The registry is built bottom-up, so a nested field's
    /// shape is always already registered by the time its containing shape
    /// is added — there is no cycle to detect.
    fn serialize(&self, shape: &Shape) -> Result<Vec<Kind>, VmFault> {
        let mut out = vec![Kind::None; shape.n_fields];
        for (_, info) in shape.fields.iter() {
            match info.kind {
                Kind::Struct => {
                    let nested = info.nested_shape.expect("struct field without nested shape");
                    let nested_shape = self.get(nested)?;
                    let nested_ser = nested_shape.serialized();
                    debug_assert_eq!(nested_ser.len(), info.ix_to - info.ix_from);
                    out[info.ix_from..info.ix_to].copy_from_slice(nested_ser);
                }
                scalar => out[info.ix_from] = scalar,
            }
        }
        Ok(out)
    }

    pub fn get(&self, name: Sym) -> Result<&Shape, VmFault> {
        self.shapes.get(&name).ok_or(VmFault::UnknownShape(name))
    }

    pub fn contains(&self, name: Sym) -> bool {
        self.shapes.contains_key(&name)
    }

    pub fn size(&self, name: Sym) -> Result<usize, VmFault> {
        Ok(self.get(name)?.n_fields())
    }

    /// Returns `(ix_from, ix_to)` for `field` on shape `name`, or the
    /// missing-field sentinel `(1, 0)` if `field` is not present.
    pub fn index_of(&self, name: Sym, field: Sym) -> Result<(usize, usize), VmFault> {
        let info = self.get(name)?.field(field);
        Ok((info.ix_from, info.ix_to))
    }

    pub fn type_of(&self, name: Sym, field: Sym) -> Result<TypeInfo, VmFault> {
        Ok(self.get(name)?.field(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sym, &Shape)> {
        self.shapes.iter().map(|(k, v)| (*k, v))
    }
}

/// The flat, in-memory realization of a shape: `n_fields` `Val`s with no
/// self-describing shape tag. Lives either as a contiguous run of operand
/// stack slots or, temporarily, as this owned `Vec` while crossing a
/// syscall boundary.
#[derive(Clone, Debug, Default)]
pub struct Struct(pub Vec<Val>);

impl Struct {
    pub fn new(vals: Vec<Val>) -> Struct {
        Struct(vals)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vals(self) -> Vec<Val> {
        self.0
    }

    pub fn as_slice(&self) -> &[Val] {
        &self.0
    }
}

/// Synthesizes the canonical tuple-shape name `"[ T1 T2 … Tn ]"` from the
/// already-resolved component shape names. Spaces are significant: exactly
/// one between tokens.
pub fn tuple_shape_name(component_names: &[&str]) -> String {
    let mut out = String::from("[");
    for name in component_names {
        out.push(' ');
        out.push_str(name);
    }
    out.push_str(" ]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapevm_symtab::SymbolTable;

    #[test]
    fn scalar_fields_occupy_contiguous_nonoverlapping_ranges() {
        let symbols = SymbolTable::new();
        let mut registry = ShapeRegistry::new();
        let mut point = Shape::new();
        point.add_field(symbols.intern("x"), Kind::Int);
        point.add_field(symbols.intern("y"), Kind::Int);
        registry.add(symbols.intern("Point"), point).unwrap();

        let point = registry.get(symbols.intern("Point")).unwrap();
        assert_eq!(point.n_fields(), 2);
        assert_eq!(point.field(symbols.intern("x")).ix_from, 0);
        assert_eq!(point.field(symbols.intern("x")).ix_to, 1);
        assert_eq!(point.field(symbols.intern("y")).ix_from, 1);
        assert_eq!(point.field(symbols.intern("y")).ix_to, 2);
        assert_eq!(point.serialized(), &[Kind::Int, Kind::Int]);
    }

    #[test]
    fn missing_field_is_the_inverted_sentinel() {
        let symbols = SymbolTable::new();
        let mut registry = ShapeRegistry::new();
        registry.add(symbols.intern("Empty"), Shape::new()).unwrap();
        let (from, to) = registry
            .index_of(symbols.intern("Empty"), symbols.intern("nope"))
            .unwrap();
        assert!(from > to);
    }

    #[test]
    fn nested_shape_serializes_to_its_own_layout_at_ix_from() {
        let symbols = SymbolTable::new();
        let mut registry = ShapeRegistry::new();

        let mut point = Shape::new();
        point.add_field(symbols.intern("x"), Kind::Int);
        point.add_field(symbols.intern("y"), Kind::Int);
        registry.add(symbols.intern("Point"), point).unwrap();

        let mut line = Shape::new();
        let point_size = registry.size(symbols.intern("Point")).unwrap();
        line.add_struct_field(symbols.intern("a"), symbols.intern("Point"), point_size);
        line.add_struct_field(symbols.intern("b"), symbols.intern("Point"), point_size);
        registry.add(symbols.intern("Line"), line).unwrap();

        let line = registry.get(symbols.intern("Line")).unwrap();
        assert_eq!(line.n_fields(), 4);
        assert_eq!(
            line.serialized(),
            &[Kind::Int, Kind::Int, Kind::Int, Kind::Int]
        );
    }

    #[test]
    fn redefining_a_shape_fails() {
        let symbols = SymbolTable::new();
        let mut registry = ShapeRegistry::new();
        registry.add(symbols.intern("S"), Shape::new()).unwrap();
        let err = registry.add(symbols.intern("S"), Shape::new()).unwrap_err();
        assert!(matches!(err, VmFault::DuplicateShape(_)));
    }

    #[test]
    fn tuple_name_joins_with_single_spaces() {
        assert_eq!(tuple_shape_name(&["Int", "Int"]), "[ Int Int ]");
        assert_eq!(tuple_shape_name(&[]), "[ ]");
    }
}
