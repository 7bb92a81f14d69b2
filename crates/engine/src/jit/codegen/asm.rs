//! A small assembler surface wrapping `dynasmrt`, restricted to exactly the
//! primitives the trace lowering needs: moving boxed/unboxed values between
//! GP and FP registers, the arithmetic and comparison ops, guards that
//! bail out to the interpreter, and closing the native loop.
//!
//! Calling convention: a compiled trace is a four-argument native function
//! `(vm, fiber, stack_base, globals_base) -> u32`, matching System V's first
//! four integer argument registers one for one:
//!
//! ```text
//! rdi = vm            (reserved; not read by any lowering rule yet)
//! rsi = fiber          (reserved; not read by any lowering rule yet)
//! rdx = stack_base     (the fiber's register window; `EntryReg`/`Phi`/field
//!                        addressing is relative to this)
//! rcx = globals_base   (the module's global-variable storage; `LoadGlobal`/
//!                        `StoreGlobal` are relative to this, not the
//!                        register window)
//! ```
//!
//! `rdi`, `rsi`, `rdx` and `rcx` are therefore never handed out by the
//! allocator, alongside `rsp` (the stack pointer, used for real spill
//! slots) and `rbp` (left alone rather than pressed into service as a frame
//! pointer). `r10`/`r11`/`r15` are reserved GP scratch for the code
//! generator's own bookkeeping (spill materialization, box/unbox tag
//! masks); `xmm14`/`xmm15` play the same role for the floating-point class.
//! See [`crate::jit::regalloc::NUM_GP_REGS`]/[`NUM_FP_REGS`] for the
//! allocator's side of this split.

use dynasmrt::{dynasm, DynasmApi, DynasmLabelApi};

use crate::vm::value::{PTR_MASK, QNAN, SIGN_BIT};

pub type GpReg = u8;
pub type FpReg = u8;

/// First operand/only-operand GP scratch, also used to materialize a
/// spilled `object`/`src` operand.
pub const GP_SCRATCH_A: GpReg = 10;
/// Second-operand GP scratch; also the tag-mask temp `box_object`,
/// `unbox_object` and `box_bool` use internally. Never aliases
/// [`GP_SCRATCH_A`] or [`GP_SCRATCH_RESULT`] within one lowered instruction,
/// so it is always safe as an independent temporary.
pub const GP_SCRATCH_B: GpReg = 11;
/// Scratch a spilled result is computed into before being written back to
/// its stack slot.
pub const GP_SCRATCH_RESULT: GpReg = 15;
/// First/only FP operand scratch; also the register a spilled FP result is
/// computed into (safe because every FP op here copies its first operand
/// into `dst` before consuming it, so aliasing `dst` with this register is
/// a correctness no-op).
pub const FP_SCRATCH_A: FpReg = 14;
/// Second FP operand scratch.
pub const FP_SCRATCH_B: FpReg = 15;

#[derive(Debug, Clone, Copy)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Where a guard's restore-stub pulls one snapshot entry's value from: a
/// live register, or a spill slot that must be reloaded first.
#[derive(Debug, Clone, Copy)]
pub enum RestoreSrc {
    Reg(GpReg),
    Spill(u32),
}

/// The primitive operation set the trace lowering is allowed to use. Kept
/// deliberately small and named after what each op does to the machine
/// state, not after the x86 mnemonics underneath it.
pub trait Assembler {
    fn new() -> Self;

    /// Reserves `spill_slots` 8-byte stack slots for the trace's private
    /// frame. Must be called exactly once, before any other emission.
    fn prologue(&mut self, spill_slots: u32);

    fn load_const_f64(&mut self, dst: FpReg, value: f64);
    /// Materializes a 64-bit integer immediate directly into a GP register.
    fn load_const_gp(&mut self, dst: GpReg, value: i64);
    /// Reads `stack_base + frame_offset` — the fiber's register window.
    fn load_entry_reg(&mut self, dst: GpReg, frame_offset: i32);
    /// Writes `stack_base + frame_offset`.
    fn store_reg(&mut self, frame_offset: i32, src: GpReg);
    /// Plain register-to-register move (safe to call with `dst == src`).
    fn move_gp(&mut self, dst: GpReg, src: GpReg);
    fn move_fp(&mut self, dst: FpReg, src: FpReg);

    /// Reads `object + field_offset` directly off the object pointer, not
    /// the register window.
    fn load_field(&mut self, dst: GpReg, object: GpReg, field_offset: i32);
    fn store_field(&mut self, object: GpReg, field_offset: i32, src: GpReg);

    /// Reads `globals_base + slot_offset`.
    fn load_global(&mut self, dst: GpReg, slot_offset: i32);
    fn store_global(&mut self, slot_offset: i32, src: GpReg);

    fn load_spill_gp(&mut self, dst: GpReg, slot: u32);
    fn store_spill_gp(&mut self, slot: u32, src: GpReg);
    fn load_spill_fp(&mut self, dst: FpReg, slot: u32);
    fn store_spill_fp(&mut self, slot: u32, src: FpReg);

    fn add_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg);
    fn sub_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg);
    fn mul_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg);
    fn div_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg);
    fn neg_f64(&mut self, dst: FpReg, a: FpReg);
    /// `dst = a & b` over the bit pattern, used by strength-reduced
    /// power-of-two modulo.
    fn and_gp_imm(&mut self, dst: GpReg, a: GpReg, mask: i64);
    /// `dst = a << shift`, used by strength-reduced power-of-two multiply.
    fn shl_gp_imm(&mut self, dst: GpReg, a: GpReg, shift: u8);
    /// `dst = a + b` over the unboxed integer domain (induction-variable
    /// step arithmetic).
    fn add_gp(&mut self, dst: GpReg, a: GpReg, b: GpReg);
    /// `dst = a - b` over the unboxed integer domain.
    fn sub_gp(&mut self, dst: GpReg, a: GpReg, b: GpReg);

    fn compare_f64(&mut self, dst: GpReg, op: CmpOp, a: FpReg, b: FpReg);

    /// `dst_gp = bits_of(src_fp)` — identity bit move, no tagging; boxing a
    /// number is the identity on bits.
    fn box_number(&mut self, dst_gp: GpReg, src_fp: FpReg);
    /// `dst_fp = bits_as_f64(src_gp)`.
    fn unbox_number(&mut self, dst_fp: FpReg, src_gp: GpReg);
    /// `dst_gp = truncate_to_i64(src_fp)` — a real numeric conversion, not a
    /// bit move; only sound where the value is already proven whole-numbered.
    fn int_from_number(&mut self, dst_gp: GpReg, src_fp: FpReg);
    /// `dst_fp = (f64)src_gp` — a real numeric conversion, not a bit move.
    fn number_from_int(&mut self, dst_fp: FpReg, src_gp: GpReg);
    /// Selects between the canonical `true`/`false` bit patterns based on a
    /// 0/1 GP value.
    fn box_bool(&mut self, dst_gp: GpReg, src_gp: GpReg);
    fn unbox_bool(&mut self, dst_gp: GpReg, src_gp: GpReg);
    /// ORs in the sign bit and quiet-NaN tag over a bare pointer.
    fn box_object(&mut self, dst_gp: GpReg, src_gp: GpReg);
    /// Masks off the sign bit and quiet-NaN tag, leaving a bare pointer.
    fn unbox_object(&mut self, dst_gp: GpReg, src_gp: GpReg);

    /// Emits a guard: if `value` doesn't have the expected sign+QNAN tag
    /// bits, or its masked class-pointer word doesn't equal `class_ptr`,
    /// restores every entry in `restore` back into the register window and
    /// jumps to a bailout stub that returns `exit_code` to the caller.
    fn guard_class(&mut self, object_gp: GpReg, class_ptr: usize, exit_code: u32, restore: &[(i32, RestoreSrc)]);
    /// Emits a guard on a 0/1 GP boolean matching `expected`.
    fn guard_bool(&mut self, cond_gp: GpReg, expected: bool, exit_code: u32, restore: &[(i32, RestoreSrc)]);

    /// Marks the start of the repeating loop body.
    fn mark_loop_header(&mut self);
    /// Jumps back to the loop header.
    fn jump_to_loop_header(&mut self);

    /// Finishes assembly and returns the mapped, executable trace.
    fn finalize(self) -> ExecutableTrace;
}

/// Executable native code for one compiled trace.
///
/// Holds the backing `dynasmrt::ExecutableBuffer` alive for as long as the
/// trace is reachable from the cache; codegen only ever hands out the entry
/// offset, never a raw pointer that could outlive the buffer.
pub struct ExecutableTrace {
    buffer: dynasmrt::ExecutableBuffer,
    entry: dynasmrt::AssemblyOffset,
}

impl ExecutableTrace {
    /// # Safety
    /// The caller must uphold the four-pointer calling convention this
    /// module's doc comment describes, and `stack_base`/`globals_base` must
    /// point at storage at least as large as every frame offset / slot
    /// offset the trace was lowered against.
    pub unsafe fn call(&self, vm: *mut u8, fiber: *mut u8, stack_base: *mut u8, globals_base: *mut u8) -> u32 {
        let f: extern "C" fn(*mut u8, *mut u8, *mut u8, *mut u8) -> u32 = std::mem::transmute(self.buffer.ptr(self.entry));
        f(vm, fiber, stack_base, globals_base)
    }
}

pub struct X64Assembler {
    ops: dynasmrt::x64::Assembler,
    loop_header: Option<dynasmrt::DynamicLabel>,
    entry: dynasmrt::AssemblyOffset,
    frame_bytes: i32,
}

impl X64Assembler {
    /// Restores every live snapshot entry back into the register window,
    /// then returns `exit_code`. Shared by both guard kinds.
    fn emit_restore_stub(&mut self, restore: &[(i32, RestoreSrc)], exit_code: u32) {
        for &(frame_offset, src) in restore {
            match src {
                RestoreSrc::Reg(gp_reg) => self.store_reg(frame_offset, gp_reg),
                RestoreSrc::Spill(slot) => {
                    self.load_spill_gp(GP_SCRATCH_A, slot);
                    self.store_reg(frame_offset, GP_SCRATCH_A);
                }
            }
        }
        self.emit_epilogue();
        dynasm!(self.ops ; .arch x64 ; mov eax, exit_code as i32 ; ret);
    }

    fn emit_epilogue(&mut self) {
        if self.frame_bytes > 0 {
            dynasm!(self.ops ; .arch x64 ; add rsp, self.frame_bytes);
        }
    }
}

impl Assembler for X64Assembler {
    fn new() -> Self {
        let mut ops = dynasmrt::x64::Assembler::new().expect("dynasmrt assembler init");
        let entry = ops.offset();
        X64Assembler { ops, loop_header: None, entry, frame_bytes: 0 }
    }

    fn prologue(&mut self, spill_slots: u32) {
        let bytes = ((spill_slots as i32 * 8) + 15) / 16 * 16;
        self.frame_bytes = bytes;
        if bytes > 0 {
            dynasm!(self.ops ; .arch x64 ; sub rsp, bytes);
        }
    }

    fn load_const_f64(&mut self, dst: FpReg, value: f64) {
        let bits = value.to_bits();
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(GP_SCRATCH_B), QWORD bits as i64
            ; movq Rx(dst), Rq(GP_SCRATCH_B)
        );
    }

    fn load_const_gp(&mut self, dst: GpReg, value: i64) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), QWORD value);
    }

    fn load_entry_reg(&mut self, dst: GpReg, frame_offset: i32) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), [rdx + frame_offset]);
    }

    fn store_reg(&mut self, frame_offset: i32, src: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov [rdx + frame_offset], Rq(src));
    }

    fn move_gp(&mut self, dst: GpReg, src: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), Rq(src));
    }

    fn move_fp(&mut self, dst: FpReg, src: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), Rx(src));
    }

    fn load_field(&mut self, dst: GpReg, object: GpReg, field_offset: i32) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), [Rq(object) + field_offset]);
    }

    fn store_field(&mut self, object: GpReg, field_offset: i32, src: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov [Rq(object) + field_offset], Rq(src));
    }

    fn load_global(&mut self, dst: GpReg, slot_offset: i32) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), [rcx + slot_offset]);
    }

    fn store_global(&mut self, slot_offset: i32, src: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov [rcx + slot_offset], Rq(src));
    }

    fn load_spill_gp(&mut self, dst: GpReg, slot: u32) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), [rsp + (slot as i32 * 8)]);
    }

    fn store_spill_gp(&mut self, slot: u32, src: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov [rsp + (slot as i32 * 8)], Rq(src));
    }

    fn load_spill_fp(&mut self, dst: FpReg, slot: u32) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), [rsp + (slot as i32 * 8)]);
    }

    fn store_spill_fp(&mut self, slot: u32, src: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd [rsp + (slot as i32 * 8)], Rx(src));
    }

    fn add_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), Rx(a) ; addsd Rx(dst), Rx(b));
    }

    fn sub_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), Rx(a) ; subsd Rx(dst), Rx(b));
    }

    fn mul_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), Rx(a) ; mulsd Rx(dst), Rx(b));
    }

    fn div_f64(&mut self, dst: FpReg, a: FpReg, b: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movsd Rx(dst), Rx(a) ; divsd Rx(dst), Rx(b));
    }

    fn neg_f64(&mut self, dst: FpReg, a: FpReg) {
        // Flips the sign bit via xorpd against a mask materialized into a
        // dedicated scratch register, never into `dst` itself (`dst` may
        // already hold a live operand when it's reused as `a`).
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(GP_SCRATCH_B), QWORD SIGN_BIT as i64
            ; movq Rx(FP_SCRATCH_B), Rq(GP_SCRATCH_B)
            ; movsd Rx(dst), Rx(a)
            ; xorpd Rx(dst), Rx(FP_SCRATCH_B)
        );
    }

    fn and_gp_imm(&mut self, dst: GpReg, a: GpReg, mask: i64) {
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(dst), Rq(a)
            ; mov Rq(GP_SCRATCH_B), QWORD mask
            ; and Rq(dst), Rq(GP_SCRATCH_B)
        );
    }

    fn shl_gp_imm(&mut self, dst: GpReg, a: GpReg, shift: u8) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), Rq(a) ; shl Rq(dst), shift);
    }

    fn add_gp(&mut self, dst: GpReg, a: GpReg, b: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), Rq(a) ; add Rq(dst), Rq(b));
    }

    fn sub_gp(&mut self, dst: GpReg, a: GpReg, b: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst), Rq(a) ; sub Rq(dst), Rq(b));
    }

    fn compare_f64(&mut self, dst: GpReg, op: CmpOp, a: FpReg, b: FpReg) {
        dynasm!(self.ops ; .arch x64 ; ucomisd Rx(a), Rx(b));
        match op {
            CmpOp::Lt => dynasm!(self.ops ; .arch x64 ; setb Rb(dst)),
            CmpOp::Le => dynasm!(self.ops ; .arch x64 ; setbe Rb(dst)),
            CmpOp::Gt => dynasm!(self.ops ; .arch x64 ; seta Rb(dst)),
            CmpOp::Ge => dynasm!(self.ops ; .arch x64 ; setae Rb(dst)),
            CmpOp::Eq => dynasm!(self.ops ; .arch x64 ; sete Rb(dst)),
            CmpOp::Ne => dynasm!(self.ops ; .arch x64 ; setne Rb(dst)),
        }
        dynasm!(self.ops ; .arch x64 ; and Rq(dst), 1);
    }

    fn box_number(&mut self, dst_gp: GpReg, src_fp: FpReg) {
        dynasm!(self.ops ; .arch x64 ; movq Rq(dst_gp), Rx(src_fp));
    }

    fn unbox_number(&mut self, dst_fp: FpReg, src_gp: GpReg) {
        dynasm!(self.ops ; .arch x64 ; movq Rx(dst_fp), Rq(src_gp));
    }

    fn int_from_number(&mut self, dst_gp: GpReg, src_fp: FpReg) {
        dynasm!(self.ops ; .arch x64 ; cvttsd2si Rq(dst_gp), Rx(src_fp));
    }

    fn number_from_int(&mut self, dst_fp: FpReg, src_gp: GpReg) {
        dynasm!(self.ops ; .arch x64 ; cvtsi2sd Rx(dst_fp), Rq(src_gp));
    }

    fn box_bool(&mut self, dst_gp: GpReg, src_gp: GpReg) {
        // true/false differ only in their low tag bit; QNAN | 2 is false,
        // QNAN | 3 is true, so `dst = QNAN | 2 | src_gp` selects the right
        // one when `src_gp` is 0 or 1. `src_gp` is copied into `dst` before
        // the base constant is folded in, so this is safe even when
        // `dst_gp == src_gp`.
        let base = QNAN | 0x2;
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(GP_SCRATCH_B), QWORD base as i64
            ; mov Rq(dst_gp), Rq(src_gp)
            ; or Rq(dst_gp), Rq(GP_SCRATCH_B)
        );
    }

    fn unbox_bool(&mut self, dst_gp: GpReg, src_gp: GpReg) {
        dynasm!(self.ops ; .arch x64 ; mov Rq(dst_gp), Rq(src_gp) ; and Rq(dst_gp), 1);
    }

    fn box_object(&mut self, dst_gp: GpReg, src_gp: GpReg) {
        let tag = SIGN_BIT | QNAN;
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(dst_gp), Rq(src_gp)
            ; mov Rq(GP_SCRATCH_B), QWORD tag as i64
            ; or Rq(dst_gp), Rq(GP_SCRATCH_B)
        );
    }

    fn unbox_object(&mut self, dst_gp: GpReg, src_gp: GpReg) {
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(dst_gp), Rq(src_gp)
            ; mov Rq(GP_SCRATCH_B), QWORD PTR_MASK as i64
            ; and Rq(dst_gp), Rq(GP_SCRATCH_B)
        );
    }

    fn guard_class(&mut self, object_gp: GpReg, class_ptr: usize, exit_code: u32, restore: &[(i32, RestoreSrc)]) {
        let bail = self.ops.new_dynamic_label();
        let ok = self.ops.new_dynamic_label();
        // `object_gp` is never GP_SCRATCH_B/GP_SCRATCH_RESULT (it's either a
        // real allocated register or GP_SCRATCH_A, if spilled), so reusing
        // those two here as bookkeeping temps can't clobber it.
        dynasm!(self.ops
            ; .arch x64
            ; mov Rq(GP_SCRATCH_B), QWORD PTR_MASK as i64
            ; and Rq(GP_SCRATCH_B), Rq(object_gp)
            ; mov Rq(GP_SCRATCH_RESULT), QWORD class_ptr as i64
            ; cmp [Rq(GP_SCRATCH_B) + 8], Rq(GP_SCRATCH_RESULT)
            ; jne =>bail
            ; jmp =>ok
            ; =>bail
        );
        self.emit_restore_stub(restore, exit_code);
        dynasm!(self.ops ; .arch x64 ; =>ok);
    }

    fn guard_bool(&mut self, cond_gp: GpReg, expected: bool, exit_code: u32, restore: &[(i32, RestoreSrc)]) {
        let ok = self.ops.new_dynamic_label();
        let bail = self.ops.new_dynamic_label();
        let expect_bit = if expected { 1 } else { 0 };
        dynasm!(self.ops
            ; .arch x64
            ; cmp Rq(cond_gp), expect_bit
            ; jne =>bail
            ; jmp =>ok
            ; =>bail
        );
        self.emit_restore_stub(restore, exit_code);
        dynasm!(self.ops ; .arch x64 ; =>ok);
    }

    fn mark_loop_header(&mut self) {
        let label = self.ops.new_dynamic_label();
        dynasm!(self.ops ; .arch x64 ; =>label);
        self.loop_header = Some(label);
    }

    fn jump_to_loop_header(&mut self) {
        let label = self.loop_header.expect("loop header must be marked before closing the loop");
        dynasm!(self.ops ; .arch x64 ; jmp =>label);
    }

    fn finalize(mut self) -> ExecutableTrace {
        self.emit_epilogue();
        dynasm!(self.ops ; .arch x64 ; xor eax, eax ; ret);
        let buffer = self.ops.finalize().expect("dynasmrt finalize");
        ExecutableTrace { buffer, entry: self.entry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build<F: FnOnce(&mut X64Assembler)>(spill_slots: u32, f: F) -> ExecutableTrace {
        let mut asm = X64Assembler::new();
        asm.prologue(spill_slots);
        f(&mut asm);
        asm.finalize()
    }

    #[test]
    fn empty_trace_returns_zero() {
        let trace = build(0, |_| {});
        let mut window = [0u8; 8];
        let result = unsafe {
            trace.call(std::ptr::null_mut(), std::ptr::null_mut(), window.as_mut_ptr(), std::ptr::null_mut())
        };
        assert_eq!(result, 0);
    }

    #[test]
    fn load_and_store_entry_reg_roundtrip_through_stack_base() {
        let trace = build(0, |asm| {
            asm.load_entry_reg(GP_SCRATCH_A, 0);
            asm.store_reg(8, GP_SCRATCH_A);
        });
        let mut window = [0u64; 4];
        window[0] = 0x2a;
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 0);
        assert_eq!(window[1], 0x2a);
    }

    #[test]
    fn load_field_reads_relative_to_the_object_pointer_not_stack_base() {
        let object_storage = [0u64, 0, 0, 99];
        let trace = build(0, |asm| {
            // rdx (stack_base) holds the object pointer itself here, just
            // to get it into a GP register without touching globals.
            asm.load_entry_reg(GP_SCRATCH_RESULT, 0);
            asm.load_field(GP_SCRATCH_A, GP_SCRATCH_RESULT, 24);
            asm.store_reg(8, GP_SCRATCH_A);
        });
        let mut window = [0u64; 2];
        window[0] = &object_storage as *const u64 as u64;
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 0);
        assert_eq!(window[1], 99);
    }

    #[test]
    fn global_access_is_relative_to_globals_base_not_stack_base() {
        let trace = build(0, |asm| {
            asm.load_global(GP_SCRATCH_A, 8);
            asm.store_reg(0, GP_SCRATCH_A);
        });
        let mut window = [0u64; 1];
        let globals = [0u64, 77, 0];
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                globals.as_ptr() as *mut u8,
            )
        };
        assert_eq!(result, 0);
        assert_eq!(window[0], 77);
    }

    #[test]
    fn spill_slots_are_real_stack_memory_distinct_from_the_register_window() {
        let trace = build(1, |asm| {
            asm.load_entry_reg(GP_SCRATCH_A, 0);
            asm.store_spill_gp(0, GP_SCRATCH_A);
            asm.load_spill_gp(GP_SCRATCH_B, 0);
            asm.store_reg(8, GP_SCRATCH_B);
        });
        let mut window = [0u64; 2];
        window[0] = 0xdead;
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 0);
        assert_eq!(window[1], 0xdead);
    }

    #[test]
    fn guard_class_bails_with_the_snapshot_exit_code_on_mismatch() {
        let class_ptr = 0x1234usize;
        let trace = build(0, |asm| {
            asm.load_entry_reg(GP_SCRATCH_A, 0);
            asm.guard_class(GP_SCRATCH_A, class_ptr, 7, &[]);
        });
        // A tagged "object" whose masked class word won't match class_ptr.
        let bogus_header = [crate::vm::value::SIGN_BIT | crate::vm::value::QNAN, 0];
        let mut window = [0u64; 1];
        window[0] = &bogus_header as *const u64 as u64 | crate::vm::value::SIGN_BIT | crate::vm::value::QNAN;
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 7);
    }

    #[test]
    fn arithmetic_roundtrip_add_sub_mul() {
        let trace = build(0, |asm| {
            asm.load_const_f64(FP_SCRATCH_A, 2.0);
            asm.load_const_f64(FP_SCRATCH_B, 3.0);
            asm.add_f64(0, FP_SCRATCH_A, FP_SCRATCH_B);
            asm.box_number(GP_SCRATCH_A, 0);
            asm.store_reg(0, GP_SCRATCH_A);
        });
        let mut window = [0u64; 1];
        let result = unsafe {
            trace.call(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                window.as_mut_ptr() as *mut u8,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, 0);
        assert_eq!(f64::from_bits(window[0]), 5.0);
    }
}
