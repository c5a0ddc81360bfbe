//! The assembler: turns a pre-tokenized instruction stream into a
//! [`VmCode`] catalog and a populated [`ShapeRegistry`], type-checking
//! struct field accesses against the shapes it has seen so far.
//!
//! Tokens arrive already lexed and typed by the host (an [`AsmToken`] per
//! word) rather than as raw text — this crate is not in the business of
//! parsing source syntax, only of turning typed tokens into opcodes, the
//! same division of labor the teacher draws between a textual front end
//! and `cranelift_reader`'s token stream.
//!
//! Shape-defining opcodes (`NEW_SHAPE`/`DEF_FIELD`/`DEF_STRUCT_FIELD`/
//! `DEF_SHAPE`) can be emitted in two places: as ordinary body opcodes
//! for a running program, or, when `_cmode_on` is active, mirrored into a
//! side buffer and executed immediately by [`VmAsm`]'s own tiny
//! interpreter so that later directives in the same assembly pass (type
//! checks, `_type_size`, tuple synthesis) can already see the shape.

use crate::code::{Label, Opcode, VmCode};
use crate::error::AsmError;
use crate::shape::{tuple_shape_name, Kind, Shape, ShapeRegistry, Struct};
use crate::value::Val;
use shapevm_symtab::{Sym, SymbolTable};
use smallvec::SmallVec;

/// One pre-tokenized unit of assembler input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AsmToken {
    /// An opcode mnemonic, directive name, or bare identifier (shape name,
    /// field name, function name).
    Word(Sym),
    /// A resolved type tag, as it appears after `PUSH` and in `_push_type`
    /// style directives.
    Type(Kind),
    Int(i64),
    Uint(u64),
    Real(f64),
    Bool(bool),
}

/// The result of assembling one token stream: the finished code catalog
/// and the shape registry populated along the way (including anything
/// registered by cmode).
pub struct Assembled {
    pub code: VmCode,
    pub shapes: ShapeRegistry,
}

/// One entry on the type-checker's shape stack: the struct currently being
/// built and how many of its fields have been assigned so far. Mirrors the
/// partially-built struct the emitted opcodes will leave on the VM operand
/// stack once run.
struct ShapeStackEntry {
    shape: Sym,
    /// `_mark_tuple` records the shape stack depth at the time of the
    /// mark; `_make_tupletype` pops back down to it and synthesizes a
    /// tuple shape name from everything above.
    tuple_mark: bool,
}

/// Scratch state for the nested compile-time-execution interpreter:
/// separate from the main assembler's token cursor, touched only by
/// shape-defining opcodes while `_cmode_on` is active.
#[derive(Default)]
struct CmodeState {
    active: bool,
    stack: Vec<Val>,
    scratch: Shape,
}

pub struct VmAsm {
    symbols: SymbolTable,
    shapes: ShapeRegistry,
    code: VmCode,

    tokens: Vec<AsmToken>,
    pos: usize,

    // Function bodies rarely carry more than a handful of pending struct
    // fields at once, so the common case never touches the heap.
    type_stack: SmallVec<[ShapeStackEntry; 8]>,
    // The genuine function-label stack: `_push_funlabel` opens a function
    // body by pushing its `Label` here, `_pop_funlabel` closes it. Opcodes
    // emitted while this is non-empty land in the top label's body; an
    // empty stack means we're in the toplevel initialization sequence.
    funlabel_stack: SmallVec<[Label; 4]>,

    cmode: CmodeState,
}

impl VmAsm {
    pub fn new(symbols: SymbolTable) -> VmAsm {
        VmAsm {
            symbols,
            shapes: ShapeRegistry::new(),
            code: VmCode::new(),
            tokens: Vec::new(),
            pos: 0,
            type_stack: SmallVec::new(),
            funlabel_stack: SmallVec::new(),
            cmode: CmodeState::default(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Assembles `tokens` start to finish, consuming `self`. A stray open
    /// function body at end of input is an error (`_pop_funlabel` never
    /// reached), matched against `EmptyLabelStack`.
    pub fn assemble(mut self, tokens: Vec<AsmToken>) -> Result<Assembled, AsmError> {
        self.tokens = tokens;
        self.pos = 0;
        while self.pos < self.tokens.len() {
            self.step()?;
        }
        if !self.funlabel_stack.is_empty() {
            return Err(AsmError::EmptyLabelStack);
        }
        Ok(Assembled {
            code: self.code,
            shapes: self.shapes,
        })
    }

    fn peek(&self) -> Option<AsmToken> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<AsmToken, AsmError> {
        let t = self.peek().ok_or(AsmError::UnexpectedEndOfTokens)?;
        self.pos += 1;
        Ok(t)
    }

    fn bump_word(&mut self) -> Result<Sym, AsmError> {
        match self.bump()? {
            AsmToken::Word(s) => Ok(s),
            _ => Err(AsmError::UnexpectedEndOfTokens),
        }
    }

    fn name(&self, s: &str) -> Sym {
        self.symbols.intern(s)
    }

    /// Consumes and dispatches one directive or opcode mnemonic.
    fn step(&mut self) -> Result<(), AsmError> {
        let word = self.bump_word()?;
        let text = self.symbols.resolve(word).to_string();

        match text.as_str() {
            "_push_type" => self.directive_push_type(),
            "_pop_type" => self.directive_pop_type(),
            "_drop_types" => self.directive_drop_types(),
            "_top_type" => self.directive_top_type().map(|_| ()),
            "_push_funlabel" => self.directive_push_funlabel(),
            "_pop_funlabel" => self.directive_pop_funlabel(),
            "_type_size" => self.directive_type_size(),
            "_mark_tuple" => self.directive_mark_tuple(),
            "_make_tupletype" => self.directive_make_tupletype(),
            "_fieldname_deref" => self.directive_fieldname_deref(),
            "_fieldtype_check" => self.directive_fieldtype_check(),
            "_get_fields" => self.directive_get_fields(),
            "_asmcall" => self.directive_asmcall(),
            "_cmode_on" => {
                self.cmode.active = true;
                Ok(())
            }
            "_cmode_off" => {
                self.cmode.active = false;
                Ok(())
            }
            _ => self.opcode(word, &text),
        }
    }

    /// The label opcodes emitted right now belong to: the top of the
    /// function-label stack, or the toplevel initialization sequence if no
    /// function is currently open.
    fn current_label(&self) -> Label {
        self.funlabel_stack
            .last()
            .copied()
            .unwrap_or_else(|| Label::toplevel(self.symbols.empty()))
    }

    fn emit(&mut self, op: Opcode) -> Result<(), AsmError> {
        if self.cmode.active {
            self.cmode_exec(op)?;
        }
        let label = self.current_label();
        self.code.body_mut(label).push(op);
        Ok(())
    }

    // --- type-checker shape stack ---

    fn directive_push_type(&mut self) -> Result<(), AsmError> {
        let shape = self.bump_word()?;
        if !self.shapes.contains(shape) {
            return Err(AsmError::UnknownShape(shape));
        }
        self.type_stack.push(ShapeStackEntry {
            shape,
            tuple_mark: false,
        });
        Ok(())
    }

    fn directive_pop_type(&mut self) -> Result<(), AsmError> {
        self.type_stack.pop().ok_or(AsmError::EmptyShapeStack)?;
        Ok(())
    }

    fn directive_drop_types(&mut self) -> Result<(), AsmError> {
        self.type_stack.clear();
        Ok(())
    }

    /// Returns the shape currently on top of the type stack without
    /// popping it — used by directives that need to inspect the pending
    /// struct's declared shape (e.g. before a `_fieldtype_check`) without
    /// disturbing it.
    fn directive_top_type(&mut self) -> Result<Sym, AsmError> {
        self.type_stack
            .last()
            .map(|e| e.shape)
            .ok_or(AsmError::EmptyShapeStack)
    }

    /// `_push_funlabel <name> <from> <to>`: opens a new function body,
    /// registering its `Label` and making it the target of subsequently
    /// emitted opcodes. Errors if a body for that exact label already
    /// exists.
    fn directive_push_funlabel(&mut self) -> Result<(), AsmError> {
        let name = self.bump_word()?;
        let from_shape = self.bump_word()?;
        let to_shape = self.bump_word()?;
        let label = Label::new(name, from_shape, to_shape);
        if self.code.has_body(label) {
            return Err(AsmError::DuplicateFunction(label));
        }
        self.code.body_mut(label);
        self.funlabel_stack.push(label);
        Ok(())
    }

    /// Closes the function body opened by the matching `_push_funlabel`.
    /// The type-checking stack's current top must match the function's
    /// declared `toShape` — or, if the type stack is empty, the function
    /// must declare `Void` — enforcing "every path through a function
    /// ends with a value of its declared `toShape`".
    fn directive_pop_funlabel(&mut self) -> Result<(), AsmError> {
        let top = *self.funlabel_stack.last().ok_or(AsmError::EmptyLabelStack)?;
        let declared_ok = match self.type_stack.last() {
            Some(entry) => entry.shape == top.to_shape,
            None => top.to_shape == self.name("Void"),
        };
        if !declared_ok {
            return Err(AsmError::MismatchedPopFunlabel);
        }
        self.funlabel_stack.pop();
        Ok(())
    }

    fn directive_type_size(&mut self) -> Result<(), AsmError> {
        let shape = self.bump_word()?;
        let size = self.shapes.size(shape)?;
        self.emit(Opcode::Push(Val::from_uint(size as u64)))
    }

    // --- tuple synthesis ---

    fn directive_mark_tuple(&mut self) -> Result<(), AsmError> {
        let top = self.type_stack.last_mut().ok_or(AsmError::EmptyShapeStack)?;
        top.tuple_mark = true;
        Ok(())
    }

    /// Pops back to (and including) the most recent `_mark_tuple`,
    /// synthesizes `"[ T1 T2 … ]"` from the component shape names in
    /// order, and errors if that tuple shape was never registered.
    fn directive_make_tupletype(&mut self) -> Result<(), AsmError> {
        let mark_ix = self
            .type_stack
            .iter()
            .rposition(|e| e.tuple_mark)
            .ok_or(AsmError::UnmarkedTuple)?;
        let components: Vec<Sym> = self.type_stack[mark_ix..].iter().map(|e| e.shape).collect();
        self.type_stack.truncate(mark_ix);

        let names: Vec<&str> = components.iter().map(|s| self.symbols.resolve(*s)).collect();
        let tuple_name = tuple_shape_name(&names);
        let tuple_sym = self.name(&tuple_name);
        if !self.shapes.contains(tuple_sym) {
            return Err(AsmError::UndefinedTupleShape(tuple_name));
        }
        self.type_stack.push(ShapeStackEntry {
            shape: tuple_sym,
            tuple_mark: false,
        });
        Ok(())
    }

    // --- field access ---

    fn directive_fieldname_deref(&mut self) -> Result<(), AsmError> {
        let field = self.bump_word()?;
        let top = self.type_stack.last().ok_or(AsmError::EmptyShapeStack)?;
        let info = self.shapes.type_of(top.shape, field)?;
        if info.is_missing() {
            return Err(AsmError::UnknownField {
                shape: top.shape,
                field,
            });
        }
        self.emit(Opcode::Push(Val::from_uint(info.ix_from as u64)))?;
        self.emit(Opcode::Push(Val::from_uint(info.ix_to as u64)))
    }

    /// Checks that the shape currently on top of the type stack can be
    /// assigned into `field` on the shape beneath it (by nested-shape
    /// identity for `Kind::Struct` fields, by kind equality otherwise).
    fn directive_fieldtype_check(&mut self) -> Result<(), AsmError> {
        let assigned = self.type_stack.pop().ok_or(AsmError::EmptyShapeStack)?;
        let field = self.bump_word()?;
        let target = self.type_stack.last().ok_or(AsmError::EmptyShapeStack)?;
        let info = self.shapes.type_of(target.shape, field)?;
        if info.is_missing() {
            return Err(AsmError::UnknownField {
                shape: target.shape,
                field,
            });
        }
        let ok = match info.kind {
            Kind::Struct => info.nested_shape == Some(assigned.shape),
            _ => true,
        };
        if !ok {
            return Err(AsmError::TypeCheckFailed {
                field,
                assigned: assigned.shape,
            });
        }
        Ok(())
    }

    fn directive_get_fields(&mut self) -> Result<(), AsmError> {
        let field = self.bump_word()?;
        let top = self.type_stack.last().ok_or(AsmError::EmptyShapeStack)?;
        let size = self.shapes.size(top.shape)?;
        let info = self.shapes.type_of(top.shape, field)?;
        if info.is_missing() {
            return Err(AsmError::UnknownField {
                shape: top.shape,
                field,
            });
        }
        self.emit(Opcode::Push(Val::from_uint(info.ix_from as u64)))?;
        self.emit(Opcode::Push(Val::from_uint(info.ix_to as u64)))?;
        self.emit(Opcode::Push(Val::from_uint(size as u64)))?;
        self.emit(Opcode::GetFields)
    }

    /// `_asmcall <shape> <method>`: looks `method` up in the static
    /// per-kind method table and emits whatever opcode(s) it maps to.
    /// Unlike the shape registry, this table never grows at runtime — it
    /// is the fixed vocabulary of built-in conversions/casts available on
    /// each scalar kind, exactly the way the teacher's instruction
    /// selector picks a fixed lowering for a fixed IR opcode rather than
    /// consulting a mutable table.
    fn directive_asmcall(&mut self) -> Result<(), AsmError> {
        let shape = self.bump_word()?;
        let method = self.bump_word()?;
        let method_text = self.symbols.resolve(method).to_string();
        let kind = scalar_kind_of(&self.symbols, shape);
        let op = asmcall_lookup(kind, &method_text).ok_or(AsmError::UnknownAsmCall { shape, method })?;
        self.emit(op)
    }

    // --- opcode mnemonics ---

    fn opcode(&mut self, word: Sym, text: &str) -> Result<(), AsmError> {
        let op = match text {
            "PUSH" => return self.opcode_push(),
            "POP" => Opcode::Pop,
            "SWAP" => Opcode::Swap,
            "PUSH_DUP" => Opcode::PushDup,

            "IF" => Opcode::If(self.bump_i32()?),
            "IF_NOT" => Opcode::IfNot(self.bump_i32()?),
            "IF_FAIL" => Opcode::IfFail(self.bump_i32()?),
            "IF_NOT_FAIL" => Opcode::IfNotFail(self.bump_i32()?),

            "POP_FRAMEHEAD" => Opcode::PopFrameHead,
            "POP_FRAMETAIL" => Opcode::PopFrameTail,
            "DROP_FRAME" => Opcode::DropFrame,
            "GET_FRAMEHEAD_FIELDS" => Opcode::GetFrameheadFields {
                ix_beg: self.bump_u32()?,
                ix_end: self.bump_u32()?,
            },

            "CALL" => Opcode::Call,
            "TAILCALL" => Opcode::TailCall,
            "CALL_LIGHT" => Opcode::CallLight,
            "SYSCALL" => Opcode::Syscall,

            "EXIT" => Opcode::Exit,
            "FAIL" => Opcode::Fail,

            "NEW_SHAPE" => Opcode::NewShape,
            "DEF_FIELD" => Opcode::DefField,
            "DEF_STRUCT_FIELD" => Opcode::DefStructField,
            "DEF_SHAPE" => Opcode::DefShape,

            "NEW_STRUCT" => Opcode::NewStruct(self.bump_u32()?),
            "SET_FIELDS" => Opcode::SetFields,
            "GET_FIELDS" => Opcode::GetFields,

            "ADD_INT" => Opcode::AddInt,
            "SUB_INT" => Opcode::SubInt,
            "MUL_INT" => Opcode::MulInt,
            "DIV_INT" => Opcode::DivInt,
            "REM_INT" => Opcode::RemInt,
            "NEG_INT" => Opcode::NegInt,
            "EQ_INT" => Opcode::EqInt,
            "NE_INT" => Opcode::NeInt,
            "LT_INT" => Opcode::LtInt,
            "LE_INT" => Opcode::LeInt,
            "GT_INT" => Opcode::GtInt,
            "GE_INT" => Opcode::GeInt,

            "ADD_UINT" => Opcode::AddUint,
            "SUB_UINT" => Opcode::SubUint,
            "MUL_UINT" => Opcode::MulUint,
            "DIV_UINT" => Opcode::DivUint,
            "REM_UINT" => Opcode::RemUint,
            "BITAND_UINT" => Opcode::BitAndUint,
            "BITOR_UINT" => Opcode::BitOrUint,
            "BITXOR_UINT" => Opcode::BitXorUint,
            "BITNOT_UINT" => Opcode::BitNotUint,
            "SHL_UINT" => Opcode::ShlUint,
            "SHR_UINT" => Opcode::ShrUint,
            "NOT_UINT" => Opcode::NotUint,
            "EQ_UINT" => Opcode::EqUint,
            "NE_UINT" => Opcode::NeUint,
            "LT_UINT" => Opcode::LtUint,
            "LE_UINT" => Opcode::LeUint,
            "GT_UINT" => Opcode::GtUint,
            "GE_UINT" => Opcode::GeUint,

            "ADD_REAL" => Opcode::AddReal,
            "SUB_REAL" => Opcode::SubReal,
            "MUL_REAL" => Opcode::MulReal,
            "DIV_REAL" => Opcode::DivReal,
            "NEG_REAL" => Opcode::NegReal,
            "EQ_REAL" => Opcode::EqReal,
            "NE_REAL" => Opcode::NeReal,
            "LT_REAL" => Opcode::LtReal,
            "LE_REAL" => Opcode::LeReal,
            "GT_REAL" => Opcode::GtReal,
            "GE_REAL" => Opcode::GeReal,

            "INT_TO_REAL" => Opcode::IntToReal,
            "REAL_TO_INT" => Opcode::RealToInt,
            "UINT_TO_REAL" => Opcode::UintToReal,
            "REAL_TO_UINT" => Opcode::RealToUint,
            "INT_TO_CHAR" => Opcode::IntToChar,
            "UINT_TO_CHAR" => Opcode::UintToChar,
            "NOOP" => Opcode::Noop,

            _ => return Err(AsmError::UnknownOpcode(word)),
        };
        self.emit(op)
    }

    /// `PUSH <typeTag> <literal>` — the type tag token disambiguates
    /// which `Val` constructor the following literal token feeds.
    fn opcode_push(&mut self) -> Result<(), AsmError> {
        let tag = match self.bump()? {
            AsmToken::Type(k) => k,
            _ => return Err(AsmError::ExpectedTypeTag),
        };
        let val = match (tag, self.bump()?) {
            (Kind::Int, AsmToken::Int(n)) => Val::from_int(n),
            (Kind::Uint, AsmToken::Uint(n)) => Val::from_uint(n),
            (Kind::Real, AsmToken::Real(n)) => Val::from_real(n),
            (Kind::Bool, AsmToken::Bool(b)) => Val::from_bool(b),
            (Kind::Symbol, AsmToken::Word(s)) => Val::from_sym(s),
            _ => return Err(AsmError::ExpectedTypeTag),
        };
        self.emit(Opcode::Push(val))
    }

    fn bump_i32(&mut self) -> Result<i32, AsmError> {
        match self.bump()? {
            AsmToken::Int(n) => Ok(n as i32),
            AsmToken::Uint(n) => Ok(n as i32),
            _ => Err(AsmError::UnexpectedEndOfTokens),
        }
    }

    fn bump_u32(&mut self) -> Result<u32, AsmError> {
        match self.bump()? {
            AsmToken::Int(n) => Ok(n as u32),
            AsmToken::Uint(n) => Ok(n as u32),
            _ => Err(AsmError::UnexpectedEndOfTokens),
        }
    }

    // --- cmode: execute shape-defining (and feeding) opcodes as they're emitted ---

    fn cmode_exec(&mut self, op: Opcode) -> Result<(), AsmError> {
        match op {
            Opcode::Push(v) => self.cmode.stack.push(v),
            Opcode::NewShape => self.cmode.scratch = Shape::new(),
            Opcode::DefField => {
                let kind_val = self.cmode.stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?;
                let field = self.cmode.stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?.as_sym();
                let kind = Kind::from_val(kind_val).ok_or(AsmError::ExpectedTypeTag)?;
                self.cmode.scratch.add_field(field, kind);
            }
            Opcode::DefStructField => {
                let nested = self.cmode.stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?.as_sym();
                let field = self.cmode.stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?.as_sym();
                let nested_size = self.shapes.size(nested)?;
                self.cmode.scratch.add_struct_field(field, nested, nested_size);
            }
            Opcode::DefShape => {
                let name = self.cmode.stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?.as_sym();
                let shape = std::mem::replace(&mut self.cmode.scratch, Shape::new());
                self.shapes.add(name, shape)?;
            }
            // Arithmetic feeding a shape-defining sequence (e.g. computing a
            // field count) runs against the same scratch stack.
            other => {
                let stack = &mut self.cmode.stack;
                use crate::value::{cmp_int, cmp_real, cmp_uint, conv_ops, int_ops, real_ops, uint_ops};
                use Opcode::*;
                match other {
                    AddInt => int_ops::add(stack)?,
                    SubInt => int_ops::sub(stack)?,
                    MulInt => int_ops::mul(stack)?,
                    DivInt => int_ops::div(stack)?,
                    RemInt => int_ops::rem(stack)?,
                    NegInt => int_ops::neg(stack)?,
                    EqInt => cmp_int::eq(stack)?,
                    NeInt => cmp_int::ne(stack)?,
                    LtInt => cmp_int::lt(stack)?,
                    LeInt => cmp_int::le(stack)?,
                    GtInt => cmp_int::gt(stack)?,
                    GeInt => cmp_int::ge(stack)?,
                    AddUint => uint_ops::add(stack)?,
                    SubUint => uint_ops::sub(stack)?,
                    MulUint => uint_ops::mul(stack)?,
                    DivUint => uint_ops::div(stack)?,
                    RemUint => uint_ops::rem(stack)?,
                    BitAndUint => uint_ops::bitand(stack)?,
                    BitOrUint => uint_ops::bitor(stack)?,
                    BitXorUint => uint_ops::bitxor(stack)?,
                    BitNotUint => uint_ops::bitnot(stack)?,
                    ShlUint => uint_ops::shl(stack)?,
                    ShrUint => uint_ops::shr(stack)?,
                    NotUint => uint_ops::not(stack)?,
                    EqUint => cmp_uint::eq(stack)?,
                    NeUint => cmp_uint::ne(stack)?,
                    LtUint => cmp_uint::lt(stack)?,
                    LeUint => cmp_uint::le(stack)?,
                    GtUint => cmp_uint::gt(stack)?,
                    GeUint => cmp_uint::ge(stack)?,
                    AddReal => real_ops::add(stack)?,
                    SubReal => real_ops::sub(stack)?,
                    MulReal => real_ops::mul(stack)?,
                    DivReal => real_ops::div(stack)?,
                    NegReal => real_ops::neg(stack)?,
                    EqReal => cmp_real::eq(stack)?,
                    NeReal => cmp_real::ne(stack)?,
                    LtReal => cmp_real::lt(stack)?,
                    LeReal => cmp_real::le(stack)?,
                    GtReal => cmp_real::gt(stack)?,
                    GeReal => cmp_real::ge(stack)?,
                    IntToReal => conv_ops::int_to_real(stack)?,
                    RealToInt => conv_ops::real_to_int(stack)?,
                    UintToReal => conv_ops::uint_to_real(stack)?,
                    RealToUint => conv_ops::real_to_uint(stack)?,
                    IntToChar => conv_ops::int_to_char(stack)?,
                    UintToChar => conv_ops::uint_to_char(stack)?,
                    Noop => conv_ops::noop(stack)?,
                    Pop => {
                        stack.pop().ok_or(crate::error::VmFault::StackUnderflow)?;
                    }
                    Swap => {
                        let len = stack.len();
                        if len < 2 {
                            return Err(crate::error::VmFault::StackUnderflow.into());
                        }
                        stack.swap(len - 1, len - 2);
                    }
                    PushDup => {
                        let top = *stack.last().ok_or(crate::error::VmFault::StackUnderflow)?;
                        stack.push(top);
                    }
                    // Control flow, calls, frames and struct ops have no
                    // meaning inside a compile-time shape-definition
                    // sequence; cmode is restricted to the sublanguage
                    // above by convention, the same way the teacher's own
                    // constant-folder only ever sees a restricted opcode
                    // subset.
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Maps a shape name back to the scalar [`Kind`] it names, for `_asmcall`'s
/// dispatch — only the built-in scalar shapes (`Int`, `Uint`, `Real`,
/// `Bool`, `Symbol`) have asmcall methods; anything else has none.
fn scalar_kind_of(symbols: &SymbolTable, shape: Sym) -> Option<Kind> {
    match symbols.resolve(shape) {
        "Int" => Some(Kind::Int),
        "Uint" => Some(Kind::Uint),
        "Real" => Some(Kind::Real),
        "Bool" => Some(Kind::Bool),
        "Symbol" => Some(Kind::Symbol),
        _ => None,
    }
}

/// The fixed `_asmcall` method table: `(scalar kind, method name) ->
/// opcode`. Static, because the vocabulary of built-in scalar conversions
/// is part of the language, not something user programs extend.
fn asmcall_lookup(kind: Option<Kind>, method: &str) -> Option<Opcode> {
    use Opcode::*;
    match (kind?, method) {
        (Kind::Int, "toReal") => Some(IntToReal),
        (Kind::Int, "toChar") => Some(IntToChar),
        (Kind::Int, "toUint") => Some(Noop),
        (Kind::Uint, "toReal") => Some(UintToReal),
        (Kind::Uint, "toChar") => Some(UintToChar),
        (Kind::Uint, "toInt") => Some(Noop),
        (Kind::Real, "toInt") => Some(RealToInt),
        (Kind::Real, "toUint") => Some(RealToUint),
        (Kind::Bool, "toUint") => Some(Noop),
        _ => None,
    }
}

/// Convenience for tests and small embeddings: assembles `tokens` and
/// hands back the finished catalog and registry in one call.
pub fn assemble(symbols: SymbolTable, tokens: Vec<AsmToken>) -> Result<Assembled, AsmError> {
    VmAsm::new(symbols).assemble(tokens)
}

/// A struct built by hand from `Val`s, for tests and host callers that
/// need to hand the VM an input frame-head without going through the
/// assembler's own `NEW_STRUCT`/`SET_FIELDS` opcodes.
pub fn struct_of(vals: Vec<Val>) -> Struct {
    Struct::new(vals)
}
