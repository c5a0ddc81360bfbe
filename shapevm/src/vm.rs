//! The interpreter: an operand stack of [`Val`]s, a frame stack, a single
//! fail bit, and a `(label, ip)` program counter stepping through a
//! [`VmCode`] catalog.
//!
//! There is no suspension point inside [`Vm::run`] — it executes one
//! opcode at a time, to completion, in a single `loop`, exactly like the
//! teacher's own dispatch loops. The fail bit is the sole recovery
//! mechanism (§7 of the spec); native Rust panics are reserved for
//! invariant violations the assembler should have already ruled out
//! (malformed hand-built catalogs), not for ordinary program failure.

use crate::code::{Frame, Label, Opcode, VmCode};
use crate::error::VmFault;
use crate::shape::{Kind, Shape, ShapeRegistry, Struct};
use crate::value::{cmp_int, cmp_real, cmp_uint, conv_ops, int_ops, real_ops, uint_ops, Val};
use shapevm_symtab::{Sym, SymbolTable};

/// The result of a top-level [`Vm::run`]: the struct left on top of the
/// operand stack, and whether the call chain ended via `FAIL` rather than
/// a plain `EXIT`.
#[derive(Debug)]
pub struct RunOutcome {
    pub output: Struct,
    pub failed: bool,
}

/// One VM instance. Owns its operand stack, frame stack, fail bit and
/// scratch shape; borrows the shape registry (mutably — `DEF_SHAPE` writes
/// through it) and the code catalog (read-only) from the host.
pub struct Vm<'a> {
    symbols: SymbolTable,
    code: &'a VmCode,
    shapes: &'a mut ShapeRegistry,
    stack: Vec<Val>,
    frames: Vec<Frame>,
    fail_bit: bool,
    scratch_shape: Shape,
}

impl<'a> Vm<'a> {
    pub fn new(symbols: SymbolTable, code: &'a VmCode, shapes: &'a mut ShapeRegistry) -> Vm<'a> {
        Vm {
            symbols,
            code,
            shapes,
            stack: Vec::new(),
            frames: Vec::new(),
            fail_bit: false,
            scratch_shape: Shape::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        self.shapes
    }

    /// Runs `entry` with `input` pushed as its frame-head, stepping
    /// opcodes until the frame depth unwinds back below where this call
    /// started (an `EXIT` or `FAIL` at the entry frame), then returns the
    /// `to_shape`-sized struct left on the stack.
    pub fn run(&mut self, entry: Label, input: Struct) -> Result<RunOutcome, VmFault> {
        if !self.code.has_body(entry) {
            return Err(VmFault::UndefinedLabel(entry));
        }
        let struct_size = self.shapes.size(entry.from_shape)?;
        if input.len() != struct_size {
            log::warn!(
                "input struct for {:?} has {} slot(s), shape expects {}",
                entry,
                input.len(),
                struct_size
            );
        }
        let stack_base = self.stack.len();
        self.stack.extend(input.into_vals());
        self.frames.push(Frame {
            prev_label: Label::toplevel(self.symbols.empty()),
            prev_ip: 0,
            stack_base,
            struct_size,
        });
        self.fail_bit = false;
        let entry_depth = self.frames.len();

        let mut label = entry;
        let mut ip: usize = 0;

        loop {
            let body = self
                .code
                .body(label)
                .ok_or(VmFault::UndefinedLabel(label))?;
            let opcode = *body.get(ip).ok_or(VmFault::IpOutOfBounds(label))?;
            log::trace!("{:?} @{}: {:?}", label, ip, opcode);

            match self.step(&mut label, &mut ip, opcode, entry_depth)? {
                Some(outcome) => return Ok(outcome),
                None => {}
            }
        }
    }

    /// Executes one opcode. Returns `Some(outcome)` once the call chain
    /// has unwound past `entry_depth` (the run is finished); otherwise
    /// `None` and `label`/`ip` have been updated for the next iteration.
    fn step(
        &mut self,
        label: &mut Label,
        ip: &mut usize,
        opcode: Opcode,
        entry_depth: usize,
    ) -> Result<Option<RunOutcome>, VmFault> {
        use Opcode::*;

        // Opcodes that fall through: advance ip by one and continue.
        let mut falls_through = true;

        match opcode {
            Push(v) => self.stack.push(v),
            Pop => {
                self.stack.pop().ok_or(VmFault::StackUnderflow)?;
            }
            Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(VmFault::StackUnderflow);
                }
                self.stack.swap(len - 1, len - 2);
            }
            PushDup => {
                let top = *self.stack.last().ok_or(VmFault::StackUnderflow)?;
                self.stack.push(top);
            }

            If(offset) => {
                let v = self.stack.pop().ok_or(VmFault::StackUnderflow)?;
                if v.as_uint() != 0 {
                    *ip = offset_ip(*label, *ip, offset)?;
                    falls_through = false;
                }
            }
            IfNot(offset) => {
                let v = self.stack.pop().ok_or(VmFault::StackUnderflow)?;
                if v.as_uint() == 0 {
                    *ip = offset_ip(*label, *ip, offset)?;
                    falls_through = false;
                }
            }
            IfFail(offset) => {
                if self.fail_bit {
                    *ip = offset_ip(*label, *ip, offset)?;
                    falls_through = false;
                }
            }
            IfNotFail(offset) => {
                if !self.fail_bit {
                    *ip = offset_ip(*label, *ip, offset)?;
                    falls_through = false;
                }
            }

            PopFrameHead => {
                let frame = *self.frames.last().ok_or(VmFault::FrameUnderflow)?;
                self.stack.drain(frame.stack_base..frame.stack_base + frame.struct_size);
            }
            PopFrameTail => {
                let frame = *self.frames.last().ok_or(VmFault::FrameUnderflow)?;
                self.stack.truncate(frame.stack_base + frame.struct_size);
            }
            DropFrame => {
                self.frames.pop().ok_or(VmFault::FrameUnderflow)?;
            }
            GetFrameheadFields { ix_beg, ix_end } => {
                let frame = *self.frames.last().ok_or(VmFault::FrameUnderflow)?;
                let (beg, end) = (ix_beg as usize, ix_end as usize);
                let slice: Vec<Val> = self.stack[frame.stack_base + beg..frame.stack_base + end].to_vec();
                self.stack.extend(slice);
            }

            Call => {
                let (name, from_shape, to_shape) = self.pop_label_triple()?;
                let callee = Label::new(name, from_shape, to_shape);
                if !self.code.has_body(callee) {
                    return Err(VmFault::UndefinedLabel(callee));
                }
                let struct_size = self.shapes.size(from_shape)?;
                let stack_base = self.stack.len().checked_sub(struct_size).ok_or(VmFault::StackUnderflow)?;
                self.frames.push(Frame {
                    prev_label: *label,
                    prev_ip: *ip + 1,
                    stack_base,
                    struct_size,
                });
                self.fail_bit = false;
                *label = callee;
                *ip = 0;
                falls_through = false;
            }

            TailCall => {
                let (name, from_shape, to_shape) = self.pop_label_triple()?;
                let callee = Label::new(name, from_shape, to_shape);
                if !self.code.has_body(callee) {
                    return Err(VmFault::UndefinedLabel(callee));
                }
                let new_struct_size = self.shapes.size(from_shape)?;
                let new_input: Vec<Val> = self
                    .stack
                    .split_off(self.stack.len().checked_sub(new_struct_size).ok_or(VmFault::StackUnderflow)?);
                let frame = self.frames.last_mut().ok_or(VmFault::FrameUnderflow)?;
                self.stack.truncate(frame.stack_base);
                self.stack.extend(new_input);
                frame.struct_size = new_struct_size;
                self.fail_bit = false;
                *label = callee;
                *ip = 0;
                falls_through = false;
            }

            CallLight => {
                let name = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
                let callee = Label::new(name, label.from_shape, label.to_shape);
                if !self.code.has_body(callee) {
                    return Err(VmFault::UndefinedLabel(callee));
                }
                let current = *self.frames.last().ok_or(VmFault::FrameUnderflow)?;
                self.frames.push(Frame {
                    prev_label: *label,
                    prev_ip: *ip + 1,
                    stack_base: current.stack_base,
                    struct_size: current.struct_size,
                });
                self.fail_bit = false;
                *label = callee;
                *ip = 0;
                falls_through = false;
            }

            Syscall => {
                let (name, from_shape, to_shape) = self.pop_label_triple()?;
                let callee = Label::new(name, from_shape, to_shape);
                let f = self.code.syscall(callee).ok_or(VmFault::UnknownSyscall(callee))?.clone();
                let in_size = self.shapes.size(from_shape)?;
                let out_size = self.shapes.size(to_shape)?;
                let input_vals = self
                    .stack
                    .split_off(self.stack.len().checked_sub(in_size).ok_or(VmFault::StackUnderflow)?);
                self.fail_bit = false;
                match f(self.shapes, from_shape, to_shape, Struct::new(input_vals)) {
                    Ok(result) => {
                        debug_assert_eq!(result.len(), out_size, "syscall returned the wrong struct size");
                        self.stack.extend(result.into_vals());
                    }
                    Err(()) => {
                        self.fail_bit = true;
                        self.stack.extend(std::iter::repeat(Val::ZERO).take(out_size));
                    }
                }
            }

            Exit | Fail => {
                let frame = self.frames.pop().ok_or(VmFault::FrameUnderflow)?;
                self.fail_bit = matches!(opcode, Fail);
                if self.frames.len() < entry_depth {
                    let out_size = self.shapes.size(label.to_shape)?;
                    let output: Vec<Val> = self
                        .stack
                        .split_off(self.stack.len().checked_sub(out_size).ok_or(VmFault::StackUnderflow)?);
                    return Ok(Some(RunOutcome {
                        output: Struct::new(output),
                        failed: self.fail_bit,
                    }));
                }
                *label = frame.prev_label;
                *ip = frame.prev_ip;
                falls_through = false;
            }

            NewShape => {
                self.scratch_shape = Shape::new();
            }
            DefField => {
                let kind_val = self.stack.pop().ok_or(VmFault::StackUnderflow)?;
                let field = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
                let kind = Kind::from_val(kind_val).ok_or(VmFault::StackUnderflow)?;
                self.scratch_shape.add_field(field, kind);
            }
            DefStructField => {
                let nested = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
                let field = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
                let nested_size = self.shapes.size(nested)?;
                self.scratch_shape.add_struct_field(field, nested, nested_size);
            }
            DefShape => {
                let name = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
                let shape = std::mem::replace(&mut self.scratch_shape, Shape::new());
                self.shapes.add(name, shape)?;
            }

            NewStruct(n) => {
                self.stack.extend(std::iter::repeat(Val::ZERO).take(n as usize));
            }
            SetFields => {
                let struct_size = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let ix_end = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let ix_beg = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let field_len = ix_end.checked_sub(ix_beg).ok_or(VmFault::StackUnderflow)?;
                let values = self
                    .stack
                    .split_off(self.stack.len().checked_sub(field_len).ok_or(VmFault::StackUnderflow)?);
                let struct_start = self.stack.len().checked_sub(struct_size).ok_or(VmFault::StackUnderflow)?;
                self.stack[struct_start + ix_beg..struct_start + ix_end].copy_from_slice(&values);
            }
            GetFields => {
                let struct_size = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let ix_end = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let ix_beg = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_uint() as usize;
                let whole = self
                    .stack
                    .split_off(self.stack.len().checked_sub(struct_size).ok_or(VmFault::StackUnderflow)?);
                let slice = whole
                    .get(ix_beg..ix_end)
                    .ok_or(VmFault::StackUnderflow)?
                    .to_vec();
                self.stack.extend(slice);
            }

            AddInt => int_ops::add(&mut self.stack)?,
            SubInt => int_ops::sub(&mut self.stack)?,
            MulInt => int_ops::mul(&mut self.stack)?,
            DivInt => int_ops::div(&mut self.stack)?,
            RemInt => int_ops::rem(&mut self.stack)?,
            NegInt => int_ops::neg(&mut self.stack)?,
            EqInt => cmp_int::eq(&mut self.stack)?,
            NeInt => cmp_int::ne(&mut self.stack)?,
            LtInt => cmp_int::lt(&mut self.stack)?,
            LeInt => cmp_int::le(&mut self.stack)?,
            GtInt => cmp_int::gt(&mut self.stack)?,
            GeInt => cmp_int::ge(&mut self.stack)?,

            AddUint => uint_ops::add(&mut self.stack)?,
            SubUint => uint_ops::sub(&mut self.stack)?,
            MulUint => uint_ops::mul(&mut self.stack)?,
            DivUint => uint_ops::div(&mut self.stack)?,
            RemUint => uint_ops::rem(&mut self.stack)?,
            BitAndUint => uint_ops::bitand(&mut self.stack)?,
            BitOrUint => uint_ops::bitor(&mut self.stack)?,
            BitXorUint => uint_ops::bitxor(&mut self.stack)?,
            BitNotUint => uint_ops::bitnot(&mut self.stack)?,
            ShlUint => uint_ops::shl(&mut self.stack)?,
            ShrUint => uint_ops::shr(&mut self.stack)?,
            NotUint => uint_ops::not(&mut self.stack)?,
            EqUint => cmp_uint::eq(&mut self.stack)?,
            NeUint => cmp_uint::ne(&mut self.stack)?,
            LtUint => cmp_uint::lt(&mut self.stack)?,
            LeUint => cmp_uint::le(&mut self.stack)?,
            GtUint => cmp_uint::gt(&mut self.stack)?,
            GeUint => cmp_uint::ge(&mut self.stack)?,

            AddReal => real_ops::add(&mut self.stack)?,
            SubReal => real_ops::sub(&mut self.stack)?,
            MulReal => real_ops::mul(&mut self.stack)?,
            DivReal => real_ops::div(&mut self.stack)?,
            NegReal => real_ops::neg(&mut self.stack)?,
            EqReal => cmp_real::eq(&mut self.stack)?,
            NeReal => cmp_real::ne(&mut self.stack)?,
            LtReal => cmp_real::lt(&mut self.stack)?,
            LeReal => cmp_real::le(&mut self.stack)?,
            GtReal => cmp_real::gt(&mut self.stack)?,
            GeReal => cmp_real::ge(&mut self.stack)?,

            IntToReal => conv_ops::int_to_real(&mut self.stack)?,
            RealToInt => conv_ops::real_to_int(&mut self.stack)?,
            UintToReal => conv_ops::uint_to_real(&mut self.stack)?,
            RealToUint => conv_ops::real_to_uint(&mut self.stack)?,
            IntToChar => conv_ops::int_to_char(&mut self.stack)?,
            UintToChar => conv_ops::uint_to_char(&mut self.stack)?,
            Noop => conv_ops::noop(&mut self.stack)?,
        }

        if falls_through {
            *ip += 1;
        }
        Ok(None)
    }

    /// Pops `(name, fromShape, toShape)` off the operand stack top, in
    /// that push order (so `toShape` is popped first).
    fn pop_label_triple(&mut self) -> Result<(Sym, Sym, Sym), VmFault> {
        let to = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
        let from = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
        let name = self.stack.pop().ok_or(VmFault::StackUnderflow)?.as_sym();
        Ok((name, from, to))
    }
}

fn offset_ip(label: Label, ip: usize, offset: i32) -> Result<usize, VmFault> {
    let next = ip as i64 + offset as i64;
    if next < 0 {
        return Err(VmFault::IpOutOfBounds(label));
    }
    Ok(next as usize)
}
