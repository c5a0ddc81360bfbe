//! Interned symbols shared by the shape registry, the code catalog and the
//! assembler.
//!
//! Rather than passing `String`s (and their allocations) through every
//! label, field name and shape name in the system, names are interned once
//! into a [`Sym`] — a small `Copy` handle that is cheap to hash, compare and
//! store in hot data structures like [`Shape`](../shapevm/struct.Shape.html)
//! field maps.
//!
//! The empty string is interned eagerly by every [`SymbolTable`] and is
//! always recoverable through [`SymbolTable::empty`]. Code that needs a
//! sentinel "no symbol" value (an empty tuple-mark, a toplevel label
//! component, a "no such field" result) uses that sentinel rather than
//! `Option<Sym>`, mirroring how the rest of the system treats it.

use lasso::{Key, Spur, ThreadedRodeo};
use std::fmt;
use std::sync::Arc;

/// An interned symbol.
///
/// `Sym` wraps the key returned by the underlying interner. It is `Copy`,
/// totally ordered and hashes in O(1); the only way to recover the
/// underlying text is through the [`SymbolTable`] that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(Spur);

impl Sym {
    /// Construct a `Sym` from its interner key. Exposed for implementations
    /// that need to round-trip symbols through a flat integer (e.g. when
    /// serializing opcode arguments); prefer [`SymbolTable::intern`].
    pub fn from_raw(key: Spur) -> Sym {
        Sym(key)
    }

    fn raw(self) -> Spur {
        self.0
    }

    /// The interner-key as a flat integer, for embedding a symbol inside a
    /// [`Val`](../shapevm/struct.Val.html) operand-stack cell.
    pub fn to_usize(self) -> usize {
        self.0.into_usize()
    }

    /// Recover a `Sym` from an integer previously produced by
    /// [`Sym::to_usize`]. Does not validate that the integer was ever
    /// actually interned; it is the caller's job not to corrupt the cell.
    pub fn from_usize(n: usize) -> Option<Sym> {
        Spur::try_from_usize(n).map(Sym)
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({:?})", self.0)
    }
}

/// A process-wide, append-only string interner.
///
/// `SymbolTable` is safe to share between an assembler and the VM instances
/// it feeds, and between multiple VMs embedded in the same host: interning
/// is backed by [`lasso::ThreadedRodeo`], so concurrent `intern` calls from
/// independent threads are sound. A host that only ever touches one VM from
/// one thread pays the (small) synchronization cost for nothing; that
/// tradeoff is intentional — see the concurrency notes in the crate root.
#[derive(Clone)]
pub struct SymbolTable {
    rodeo: Arc<ThreadedRodeo>,
}

impl SymbolTable {
    /// Create a new table with the empty string eagerly interned, always
    /// recoverable via [`SymbolTable::empty`].
    pub fn new() -> SymbolTable {
        let rodeo = ThreadedRodeo::new();
        let empty = rodeo.get_or_intern("");
        debug_assert_eq!(empty, Spur::try_from_usize(0).unwrap());
        SymbolTable {
            rodeo: Arc::new(rodeo),
        }
    }

    /// Intern `text`, returning the `Sym` for it. Interning the same text
    /// twice (from any thread sharing this table) returns the same `Sym`.
    pub fn intern(&self, text: &str) -> Sym {
        Sym(self.rodeo.get_or_intern(text))
    }

    /// Look up the text for a previously interned symbol.
    ///
    /// Panics if `sym` was not produced by this table — callers only ever
    /// hold `Sym`s handed back by `intern`, so this is an invariant
    /// violation rather than a recoverable error.
    pub fn resolve(&self, sym: Sym) -> &str {
        self.rodeo.resolve(&sym.raw())
    }

    /// The sentinel "empty" symbol, always present in a fresh table.
    pub fn empty(&self) -> Sym {
        Sym(self.rodeo.get("").expect("empty string not interned"))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_empty_string_eagerly() {
        let table = SymbolTable::new();
        assert_eq!(table.resolve(table.empty()), "");
    }

    #[test]
    fn repeated_interning_is_stable() {
        let table = SymbolTable::new();
        let a = table.intern("point");
        let b = table.intern("point");
        assert_eq!(a, b);
        assert_eq!(table.resolve(a), "point");
    }

    #[test]
    fn distinct_text_gets_distinct_symbols() {
        let table = SymbolTable::new();
        let a = table.intern("x");
        let b = table.intern("y");
        assert_ne!(a, b);
    }

    #[test]
    fn raw_round_trips_through_usize() {
        let table = SymbolTable::new();
        let sym = table.intern("roundtrip");
        let back = Sym::from_usize(sym.to_usize()).unwrap();
        assert_eq!(sym, back);
    }

    #[test]
    fn shared_table_is_visible_across_clones() {
        let table = SymbolTable::new();
        let clone = table.clone();
        let sym = table.intern("shared");
        assert_eq!(clone.resolve(sym), "shared");
    }
}
