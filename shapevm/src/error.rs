//! Host-level faults.
//!
//! These are the only errors this crate returns through `Result`. The
//! in-VM fail bit (set/cleared by `FAIL`/`EXIT`/a failing syscall) is a
//! distinct, unrecoverable-from-Rust's-perspective piece of VM state — see
//! [`crate::vm::Vm::fail_bit`] — and never appears here. A `VmFault` or
//! `AsmError` means the embedding host made a mistake (or fed the VM a
//! malformed program); a set fail bit means the *VM program itself*
//! signalled failure, which is normal control flow the program can check.

use crate::code::Label;
use shapevm_symtab::Sym;
use thiserror::Error;

/// A fault raised while running assembled code.
#[derive(Debug, Error)]
pub enum VmFault {
    #[error("instruction pointer out of bounds in {0:?}")]
    IpOutOfBounds(Label),

    #[error("undefined label {0:?}")]
    UndefinedLabel(Label),

    #[error("unknown shape (symbol id {0:?})")]
    UnknownShape(Sym),

    #[error("unknown field (symbol id {0:?}) on shape (symbol id {1:?})")]
    UnknownField(Sym, Sym),

    #[error("shape (symbol id {0:?}) is already defined")]
    DuplicateShape(Sym),

    #[error("no syscall registered for label {0:?}")]
    UnknownSyscall(Label),

    #[error("syscall already registered for label {0:?}")]
    DuplicateCallback(Label),

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("frame stack underflow")]
    FrameUnderflow,
}

/// An error raised while assembling a token stream.
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("unknown opcode mnemonic {0:?}")]
    UnknownOpcode(Sym),

    #[error("unknown directive {0:?}")]
    UnknownDirective(Sym),

    #[error("function {0:?} is already defined")]
    DuplicateFunction(Label),

    #[error("shape (symbol id {0:?}) is already defined")]
    DuplicateShape(Sym),

    #[error("unknown shape (symbol id {0:?})")]
    UnknownShape(Sym),

    #[error("unknown field (symbol id {field:?}) on shape (symbol id {shape:?})")]
    UnknownField { shape: Sym, field: Sym },

    #[error("value of shape (symbol id {assigned:?}) is not assignable to field (symbol id {field:?})")]
    TypeCheckFailed { field: Sym, assigned: Sym },

    #[error("no _asmcall mapping for method (symbol id {method:?}) on shape (symbol id {shape:?})")]
    UnknownAsmCall { shape: Sym, method: Sym },

    #[error("_pop_funlabel does not match the current function's declared return shape")]
    MismatchedPopFunlabel,

    #[error("_make_tupletype: tuple shape \"{0}\" is not registered")]
    UndefinedTupleShape(String),

    #[error("_mark_tuple sentinel not found on the shape stack")]
    UnmarkedTuple,

    #[error("shape stack is empty")]
    EmptyShapeStack,

    #[error("label stack is empty (no current function)")]
    EmptyLabelStack,

    #[error("token stream ended before the current directive/opcode finished")]
    UnexpectedEndOfTokens,

    #[error("expected a type tag (Sym, Int, UInt, Real or Bool) after PUSH")]
    ExpectedTypeTag,

    #[error(transparent)]
    Vm(#[from] VmFault),
}
