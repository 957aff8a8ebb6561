//! Calling convention: boxed values in and out of typed register banks.

use std::sync::Arc;

use crate::val::BValue;

use super::{RegisterCounts, RegisterFile, RegisterLayout, VmError};

/// Lower boxed arguments into a fresh register file shaped by `params`.
pub fn lower_arguments(params: &RegisterLayout, args: &[BValue]) -> Result<RegisterFile, VmError> {
    let mut regs = RegisterFile::new(params.counts());
    lower_into(&mut regs, params, args)?;
    Ok(regs)
}

/// Lower boxed arguments into an existing register file at the slots `params` assigns.
pub fn lower_into(regs: &mut RegisterFile, params: &RegisterLayout, args: &[BValue]) -> Result<(), VmError> {
    if params.len() != args.len() {
        return Err(VmError::ArityMismatch {
            unit: Arc::from(signature(params)),
            expected: params.len(),
            actual: args.len(),
        });
    }
    for (position, ((tag, idx), value)) in params.tags().iter().zip(params.regs()).zip(args).enumerate() {
        regs.store(*tag, *idx, value).map_err(|actual| VmError::TypeTagMismatch {
            position,
            declared: *tag,
            actual,
        })?;
    }
    Ok(())
}

/// `(int, string)` rendering of a layout's declared types, naming a bare signature in errors.
fn signature(layout: &RegisterLayout) -> String {
    let types: Vec<String> = layout.types().iter().map(ToString::to_string).collect();
    format!("({})", types.join(", "))
}

/// Raise the slots `returns` assigns back into boxed values, in declaration order.
pub fn raise_returns(returns: &RegisterLayout, regs: &RegisterFile) -> Vec<BValue> {
    returns
        .tags()
        .iter()
        .zip(returns.regs())
        .map(|(tag, idx)| regs.load(*tag, *idx))
        .collect()
}

/// Build a worker's local register file and seed it with the caller's arguments.
///
/// Argument `i` is read from `source` at `arg_regs[i]` and written to the next free slot of
/// its bank in the worker's file, so parameters occupy the low slots of every bank.
pub fn seed_worker_locals(
    local_counts: &RegisterCounts,
    params: &RegisterLayout,
    source: &RegisterFile,
    arg_regs: &[usize],
) -> RegisterFile {
    let mut local = RegisterFile::new(local_counts);
    let mut cursor = RegisterCounts::default();
    for (tag, src_idx) in params.tags().iter().zip(arg_regs) {
        let dst_idx = cursor.bump(*tag);
        local.copy_slot(*tag, dst_idx, source, *src_idx);
    }
    local
}

/// Copy return slots from `src` at `src_regs` into `dst` at `dst_regs`, position by position.
pub fn copy_returns(
    returns: &RegisterLayout,
    src: &RegisterFile,
    src_regs: &[usize],
    dst: &mut RegisterFile,
    dst_regs: &[usize],
) {
    for ((tag, src_idx), dst_idx) in returns.tags().iter().zip(src_regs).zip(dst_regs) {
        dst.copy_slot(*tag, *dst_idx, src, *src_idx);
    }
}
