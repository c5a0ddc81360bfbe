//! Labels, opcodes, call frames and the code catalog.
//!
//! A [`Label`] is the overload key the rest of the system calls things by:
//! the same `name` with a different `(fromShape, toShape)` pair is a
//! different code body. [`VmCode`] maps a `Label` to either an assembled
//! opcode sequence or a native syscall callback, the same way the teacher's
//! `Function` maps an `Inst` to its `InstructionData` — a dense,
//! append-only table keyed by a small `Copy` handle.

use crate::error::VmFault;
use shapevm_symtab::Sym;
use std::collections::HashMap;
use std::sync::Arc;

/// `(name, fromShape, toShape)`. Two labels are equal iff all three
/// components match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub name: Sym,
    pub from_shape: Sym,
    pub to_shape: Sym,
}

impl Label {
    pub fn new(name: Sym, from_shape: Sym, to_shape: Sym) -> Label {
        Label {
            name,
            from_shape,
            to_shape,
        }
    }

    /// The label used for the assembler's top-level initialization sequence
    /// and as the compile-time-execution buffer's home. All three
    /// components are the sentinel empty symbol.
    pub fn toplevel(empty: Sym) -> Label {
        Label::new(empty, empty, empty)
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {:?}->{:?}",
            self.name, self.from_shape, self.to_shape
        )
    }
}

impl std::fmt::Display for Opcode {
    /// Renders the opcode as the mnemonic (plus arguments) that
    /// [`crate::asm::VmAsm`] accepts for it, per §6's external-interface
    /// grammar. `Push` always prints its argument as `UInt <raw bits>`: a
    /// [`crate::value::Val`] carries no type tag of its own, so printing it
    /// that way and re-parsing it back is exact at the bit level regardless
    /// of which of `Int`/`Uint`/`Real`/`Bool`/`Symbol` produced it — the
    /// same property that lets the VM dispatch every `Val` purely by which
    /// opcode consumes it.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Opcode::*;
        match self {
            Push(v) => write!(f, "PUSH UInt {}", v.raw()),
            Pop => write!(f, "POP"),
            Swap => write!(f, "SWAP"),
            PushDup => write!(f, "PUSH_DUP"),

            If(o) => write!(f, "IF {o}"),
            IfNot(o) => write!(f, "IF_NOT {o}"),
            IfFail(o) => write!(f, "IF_FAIL {o}"),
            IfNotFail(o) => write!(f, "IF_NOT_FAIL {o}"),

            PopFrameHead => write!(f, "POP_FRAMEHEAD"),
            PopFrameTail => write!(f, "POP_FRAMETAIL"),
            DropFrame => write!(f, "DROP_FRAME"),
            GetFrameheadFields { ix_beg, ix_end } => write!(f, "GET_FRAMEHEAD_FIELDS {ix_beg} {ix_end}"),

            Call => write!(f, "CALL"),
            TailCall => write!(f, "TAILCALL"),
            CallLight => write!(f, "CALL_LIGHT"),
            Syscall => write!(f, "SYSCALL"),

            Exit => write!(f, "EXIT"),
            Fail => write!(f, "FAIL"),

            NewShape => write!(f, "NEW_SHAPE"),
            DefField => write!(f, "DEF_FIELD"),
            DefStructField => write!(f, "DEF_STRUCT_FIELD"),
            DefShape => write!(f, "DEF_SHAPE"),

            NewStruct(n) => write!(f, "NEW_STRUCT {n}"),
            SetFields => write!(f, "SET_FIELDS"),
            GetFields => write!(f, "GET_FIELDS"),

            AddInt => write!(f, "ADD_INT"),
            SubInt => write!(f, "SUB_INT"),
            MulInt => write!(f, "MUL_INT"),
            DivInt => write!(f, "DIV_INT"),
            RemInt => write!(f, "REM_INT"),
            NegInt => write!(f, "NEG_INT"),
            EqInt => write!(f, "EQ_INT"),
            NeInt => write!(f, "NE_INT"),
            LtInt => write!(f, "LT_INT"),
            LeInt => write!(f, "LE_INT"),
            GtInt => write!(f, "GT_INT"),
            GeInt => write!(f, "GE_INT"),

            AddUint => write!(f, "ADD_UINT"),
            SubUint => write!(f, "SUB_UINT"),
            MulUint => write!(f, "MUL_UINT"),
            DivUint => write!(f, "DIV_UINT"),
            RemUint => write!(f, "REM_UINT"),
            BitAndUint => write!(f, "BITAND_UINT"),
            BitOrUint => write!(f, "BITOR_UINT"),
            BitXorUint => write!(f, "BITXOR_UINT"),
            BitNotUint => write!(f, "BITNOT_UINT"),
            ShlUint => write!(f, "SHL_UINT"),
            ShrUint => write!(f, "SHR_UINT"),
            NotUint => write!(f, "NOT_UINT"),
            EqUint => write!(f, "EQ_UINT"),
            NeUint => write!(f, "NE_UINT"),
            LtUint => write!(f, "LT_UINT"),
            LeUint => write!(f, "LE_UINT"),
            GtUint => write!(f, "GT_UINT"),
            GeUint => write!(f, "GE_UINT"),

            AddReal => write!(f, "ADD_REAL"),
            SubReal => write!(f, "SUB_REAL"),
            MulReal => write!(f, "MUL_REAL"),
            DivReal => write!(f, "DIV_REAL"),
            NegReal => write!(f, "NEG_REAL"),
            EqReal => write!(f, "EQ_REAL"),
            NeReal => write!(f, "NE_REAL"),
            LtReal => write!(f, "LT_REAL"),
            LeReal => write!(f, "LE_REAL"),
            GtReal => write!(f, "GT_REAL"),
            GeReal => write!(f, "GE_REAL"),

            IntToReal => write!(f, "INT_TO_REAL"),
            RealToInt => write!(f, "REAL_TO_INT"),
            UintToReal => write!(f, "UINT_TO_REAL"),
            RealToUint => write!(f, "REAL_TO_UINT"),
            IntToChar => write!(f, "INT_TO_CHAR"),
            UintToChar => write!(f, "UINT_TO_CHAR"),
            Noop => write!(f, "NOOP"),
        }
    }
}

/// Pretty-prints a [`Label`] as `<name> <from>-><to>` using a symbol table
/// to resolve the interned names to text, per the canonical form in the
/// external-interface section of the spec. `Label`'s own `Debug` impl
/// cannot do this since it has no access to a symbol table.
pub struct LabelDisplay<'a> {
    pub label: Label,
    pub symbols: &'a shapevm_symtab::SymbolTable,
}

impl<'a> std::fmt::Display for LabelDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}->{}",
            self.symbols.resolve(self.label.name),
            self.symbols.resolve(self.label.from_shape),
            self.symbols.resolve(self.label.to_shape)
        )
    }
}

/// One instruction. Arguments are carried inline rather than as a raw
/// opcode byte plus separately-indexed operand bytes, matching the
/// teacher's typed `InstructionData` over a bare byte stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Opcode {
    // --- stack ---
    Push(crate::value::Val),
    Pop,
    Swap,
    PushDup,

    // --- control: conditional, stack-consuming ---
    If(i32),
    IfNot(i32),
    // --- control: failure-bit, non-consuming ---
    IfFail(i32),
    IfNotFail(i32),

    // --- frame manipulation ---
    PopFrameHead,
    PopFrameTail,
    DropFrame,
    GetFrameheadFields { ix_beg: u32, ix_end: u32 },

    // --- calls ---
    Call,
    TailCall,
    CallLight,
    Syscall,

    // --- termination ---
    Exit,
    Fail,

    // --- shape-defining (emit-time, via the cmode submachine) ---
    NewShape,
    DefField,
    DefStructField,
    DefShape,

    // --- struct ops ---
    NewStruct(u32),
    SetFields,
    GetFields,

    // --- signed-integer arithmetic ---
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    NegInt,
    EqInt,
    NeInt,
    LtInt,
    LeInt,
    GtInt,
    GeInt,

    // --- unsigned-integer arithmetic, bitwise, boolean-not ---
    AddUint,
    SubUint,
    MulUint,
    DivUint,
    RemUint,
    BitAndUint,
    BitOrUint,
    BitXorUint,
    BitNotUint,
    ShlUint,
    ShrUint,
    NotUint,
    EqUint,
    NeUint,
    LtUint,
    LeUint,
    GtUint,
    GeUint,

    // --- real arithmetic ---
    AddReal,
    SubReal,
    MulReal,
    DivReal,
    NegReal,
    EqReal,
    NeReal,
    LtReal,
    LeReal,
    GtReal,
    GeReal,

    // --- conversions / reinterpret casts ---
    IntToReal,
    RealToInt,
    UintToReal,
    RealToUint,
    IntToChar,
    UintToChar,
    Noop,
}

/// Callback signature for a `SYSCALL` label: receives the caller-prepared
/// input struct and produces either a result struct of `toShape`'s size or
/// a failure signal (which sets the VM's fail bit).
pub type SyscallFn = Arc<
    dyn Fn(&crate::shape::ShapeRegistry, Sym, Sym, crate::shape::Struct) -> Result<crate::shape::Struct, ()>
        + Send
        + Sync,
>;

/// The code catalog: every assembled function body and every registered
/// native callback, keyed by label.
#[derive(Default)]
pub struct VmCode {
    bodies: HashMap<Label, Vec<Opcode>>,
    syscalls: HashMap<Label, SyscallFn>,
}

impl VmCode {
    pub fn new() -> VmCode {
        VmCode::default()
    }

    pub fn define(&mut self, label: Label, body: Vec<Opcode>) {
        self.bodies.insert(label, body);
    }

    pub fn body(&self, label: Label) -> Option<&[Opcode]> {
        self.bodies.get(&label).map(|v| v.as_slice())
    }

    pub fn body_mut(&mut self, label: Label) -> &mut Vec<Opcode> {
        self.bodies.entry(label).or_default()
    }

    pub fn has_body(&self, label: Label) -> bool {
        self.bodies.contains_key(&label)
    }

    /// Registers a native callback for `label`. Errors if one is already
    /// registered for the same label, per the external-interface contract.
    pub fn register_syscall(&mut self, label: Label, f: SyscallFn) -> Result<(), VmFault> {
        if self.syscalls.contains_key(&label) {
            return Err(VmFault::DuplicateCallback(label));
        }
        self.syscalls.insert(label, f);
        Ok(())
    }

    pub fn syscall(&self, label: Label) -> Option<&SyscallFn> {
        self.syscalls.get(&label)
    }
}

/// A call frame. `stack_base` is the absolute operand-stack index where the
/// callee's input struct begins; `struct_size` is its slot count.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    pub prev_label: Label,
    pub prev_ip: usize,
    pub stack_base: usize,
    pub struct_size: usize,
}
