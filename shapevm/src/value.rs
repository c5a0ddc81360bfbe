//! The untyped 64-bit value cell and the arithmetic families defined over
//! it.
//!
//! [`Val`] carries no runtime tag: the opcode dispatching an operation
//! picks which of the three views (signed, unsigned, IEEE-754 double) the
//! bits mean. This mirrors `DataValue`'s role in the teacher codebase, but
//! collapsed to a single untagged cell rather than an enum, since nothing
//! here needs to recover "what kind of value is this" at runtime — the
//! call-site shape always knows.

use crate::error::VmFault;
use shapevm_symtab::Sym;

/// A 64-bit operand-stack cell, reinterpretable as `i64`, `u64` or `f64`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Val(u64);

impl Val {
    pub const ZERO: Val = Val(0);

    pub fn from_int(v: i64) -> Val {
        Val(v as u64)
    }

    pub fn from_uint(v: u64) -> Val {
        Val(v)
    }

    pub fn from_real(v: f64) -> Val {
        Val(v.to_bits())
    }

    pub fn from_bool(v: bool) -> Val {
        Val(v as u64)
    }

    pub fn as_int(self) -> i64 {
        self.0 as i64
    }

    pub fn as_uint(self) -> u64 {
        self.0
    }

    pub fn as_real(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for Val {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Val(0x{:016x})", self.0)
    }
}

impl Val {
    /// Pack an interned symbol into a cell, for `PUSH Sym ...` and for
    /// labels/shape-names that travel through the operand stack.
    pub fn from_sym(sym: Sym) -> Val {
        Val(sym.to_usize() as u64)
    }

    /// Unpack a cell previously produced by [`Val::from_sym`].
    pub fn as_sym(self) -> Sym {
        Sym::from_usize(self.0 as usize).expect("corrupt symbol cell")
    }
}

/// Binary stack-op shape shared by every arithmetic/comparison/bitwise
/// opcode: pop `v2`, pop `v1`, push `f(v1, v2)`.
pub fn binop(stack: &mut Vec<Val>, f: impl FnOnce(Val, Val) -> Val) -> Result<(), VmFault> {
    let v2 = stack.pop().ok_or(VmFault::StackUnderflow)?;
    let v1 = stack.pop().ok_or(VmFault::StackUnderflow)?;
    stack.push(f(v1, v2));
    Ok(())
}

fn unop(stack: &mut Vec<Val>, f: impl FnOnce(Val) -> Val) -> Result<(), VmFault> {
    let v = stack.pop().ok_or(VmFault::StackUnderflow)?;
    stack.push(f(v));
    Ok(())
}

macro_rules! cmp_ops {
    ($name:ident, $as:ident) => {
        pub mod $name {
            use super::*;
            pub fn eq(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() == b.$as()))
    }
            pub fn ne(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() != b.$as()))
    }
            pub fn lt(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() < b.$as()))
    }
            pub fn le(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() <= b.$as()))
    }
            pub fn gt(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() > b.$as()))
    }
            pub fn ge(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_bool(a.$as() >= b.$as()))
    }
        }
    };
}

cmp_ops!(cmp_int, as_int);
cmp_ops!(cmp_uint, as_uint);
cmp_ops!(cmp_real, as_real);

/// Signed-integer arithmetic; overflow wraps (two's complement).
pub mod int_ops {
    use super::*;
    pub fn add(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_int(a.as_int().wrapping_add(b.as_int())))
    }
    pub fn sub(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_int(a.as_int().wrapping_sub(b.as_int())))
    }
    pub fn mul(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_int(a.as_int().wrapping_mul(b.as_int())))
    }
    /// Division by zero is a host-level fault, not a panic or a wrapped
    /// value — checked explicitly since `wrapping_div` still panics on a
    /// zero divisor.
    pub fn div(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        let b = stack.pop().ok_or(VmFault::StackUnderflow)?;
        let a = stack.pop().ok_or(VmFault::StackUnderflow)?;
        if b.as_int() == 0 {
            return Err(VmFault::DivisionByZero);
        }
        stack.push(Val::from_int(a.as_int().wrapping_div(b.as_int())));
        Ok(())
    }
    pub fn rem(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        let b = stack.pop().ok_or(VmFault::StackUnderflow)?;
        let a = stack.pop().ok_or(VmFault::StackUnderflow)?;
        if b.as_int() == 0 {
            return Err(VmFault::DivisionByZero);
        }
        stack.push(Val::from_int(a.as_int().wrapping_rem(b.as_int())));
        Ok(())
    }
    pub fn neg(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_int(a.as_int().wrapping_neg()))
    }
}

/// Unsigned-integer arithmetic, bitwise ops and boolean-not; overflow wraps.
pub mod uint_ops {
    use super::*;
    pub fn add(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint().wrapping_add(b.as_uint())))
    }
    pub fn sub(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint().wrapping_sub(b.as_uint())))
    }
    pub fn mul(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint().wrapping_mul(b.as_uint())))
    }
    pub fn div(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        let b = stack.pop().ok_or(VmFault::StackUnderflow)?;
        let a = stack.pop().ok_or(VmFault::StackUnderflow)?;
        if b.as_uint() == 0 {
            return Err(VmFault::DivisionByZero);
        }
        stack.push(Val::from_uint(a.as_uint().wrapping_div(b.as_uint())));
        Ok(())
    }
    pub fn rem(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        let b = stack.pop().ok_or(VmFault::StackUnderflow)?;
        let a = stack.pop().ok_or(VmFault::StackUnderflow)?;
        if b.as_uint() == 0 {
            return Err(VmFault::DivisionByZero);
        }
        stack.push(Val::from_uint(a.as_uint().wrapping_rem(b.as_uint())));
        Ok(())
    }
    pub fn bitand(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint() & b.as_uint()))
    }
    pub fn bitor(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint() | b.as_uint()))
    }
    pub fn bitxor(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint() ^ b.as_uint()))
    }
    pub fn bitnot(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_uint(!a.as_uint()))
    }
    pub fn shl(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint().wrapping_shl(b.as_uint() as u32)))
    }
    pub fn shr(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_uint(a.as_uint().wrapping_shr(b.as_uint() as u32)))
    }
    /// Logical not: zero becomes 1, anything else becomes 0.
    pub fn not(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_bool(a.as_uint() == 0))
    }
}

/// IEEE-754 double arithmetic.
pub mod real_ops {
    use super::*;
    pub fn add(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_real(a.as_real() + b.as_real()))
    }
    pub fn sub(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_real(a.as_real() - b.as_real()))
    }
    pub fn mul(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_real(a.as_real() * b.as_real()))
    }
    pub fn div(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        binop(stack, |a, b| Val::from_real(a.as_real() / b.as_real()))
    }
    pub fn neg(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_real(-a.as_real()))
    }
}

/// Conversions between numeric kinds, and the trivial reinterpret casts
/// between Int/UInt/Bool that the assembler's method table maps to `NOOP`.
pub mod conv_ops {
    use super::*;
    pub fn int_to_real(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_real(a.as_int() as f64))
    }
    pub fn real_to_int(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_int(a.as_real() as i64))
    }
    pub fn uint_to_real(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_real(a.as_uint() as f64))
    }
    pub fn real_to_uint(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| Val::from_uint(a.as_real() as u64))
    }
    /// Identity: the bit pattern is already a valid `char` codepoint cell.
    pub fn int_to_char(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| a)
    }
    pub fn uint_to_char(stack: &mut Vec<Val>) -> Result<(), VmFault> {
        unop(stack, |a| a)
    }
    pub fn noop(_stack: &mut Vec<Val>) -> Result<(), VmFault> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_wraps_on_overflow() {
        let mut stack = vec![Val::from_int(i64::MAX), Val::from_int(1)];
        int_ops::add(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap().as_int(), i64::MIN);
    }

    #[test]
    fn real_round_trips_bits() {
        let v = Val::from_real(std::f64::consts::PI);
        assert_eq!(v.as_real(), std::f64::consts::PI);
    }

    #[test]
    fn comparisons_yield_zero_or_one() {
        let mut stack = vec![Val::from_int(3), Val::from_int(4)];
        cmp_int::lt(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap().as_uint(), 1);
    }

    #[test]
    fn bitwise_not_is_distinct_from_boolean_not() {
        let mut stack = vec![Val::from_uint(0)];
        uint_ops::not(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap().as_uint(), 1);

        let mut stack = vec![Val::from_uint(0)];
        uint_ops::bitnot(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap().as_uint(), u64::MAX);
    }

    #[test]
    fn integer_division_by_zero_is_a_fault_not_a_panic() {
        let mut stack = vec![Val::from_int(8), Val::from_int(0)];
        assert!(matches!(int_ops::div(&mut stack), Err(VmFault::DivisionByZero)));
    }

    #[test]
    fn real_division_by_zero_yields_infinity() {
        let mut stack = vec![Val::from_real(1.0), Val::from_real(0.0)];
        real_ops::div(&mut stack).unwrap();
        assert!(stack.pop().unwrap().as_real().is_infinite());
    }
}
