//! Typed register banks and the per-signature layouts that size them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::val::{BRef, BType, BValue, ValueTag};

use super::VmError;

/// Slot count per register bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterCounts {
    pub longs: usize,
    pub doubles: usize,
    pub strings: usize,
    pub ints: usize,
    pub blobs: usize,
    pub refs: usize,
}

impl RegisterCounts {
    #[inline]
    pub fn get(&self, tag: ValueTag) -> usize {
        match tag {
            ValueTag::Int => self.longs,
            ValueTag::Float => self.doubles,
            ValueTag::Str => self.strings,
            ValueTag::Bool => self.ints,
            ValueTag::Blob => self.blobs,
            ValueTag::Ref => self.refs,
        }
    }

    /// Claim the next free slot of `tag`'s bank and return its index.
    #[inline]
    pub fn bump(&mut self, tag: ValueTag) -> usize {
        let slot = match tag {
            ValueTag::Int => &mut self.longs,
            ValueTag::Float => &mut self.doubles,
            ValueTag::Str => &mut self.strings,
            ValueTag::Bool => &mut self.ints,
            ValueTag::Blob => &mut self.blobs,
            ValueTag::Ref => &mut self.refs,
        };
        let idx = *slot;
        *slot += 1;
        idx
    }

    /// Whether every bank of `self` is at least as large as the matching bank of `other`.
    pub fn covers(&self, other: &RegisterCounts) -> bool {
        ValueTag::ALL.iter().all(|tag| self.get(*tag) >= other.get(*tag))
    }

    /// Bank-wise maximum of two counts.
    pub fn max(&self, other: &RegisterCounts) -> RegisterCounts {
        RegisterCounts {
            longs: self.longs.max(other.longs),
            doubles: self.doubles.max(other.doubles),
            strings: self.strings.max(other.strings),
            ints: self.ints.max(other.ints),
            blobs: self.blobs.max(other.blobs),
            refs: self.refs.max(other.refs),
        }
    }

    pub fn total(&self) -> usize {
        self.longs + self.doubles + self.strings + self.ints + self.blobs + self.refs
    }
}

/// Register placement of one signature (parameters or returns).
///
/// `regs[i]` is the slot of position `i` inside the bank selected by `tags[i]`. Slots grow
/// strictly by declaration order within a bank, independent of other banks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLayout {
    types: Arc<[BType]>,
    tags: Arc<[ValueTag]>,
    regs: Arc<[usize]>,
    counts: RegisterCounts,
}

impl RegisterLayout {
    pub fn for_signature(types: &[BType]) -> Result<Self, VmError> {
        let mut counts = RegisterCounts::default();
        let mut tags = Vec::with_capacity(types.len());
        let mut regs = Vec::with_capacity(types.len());
        for ty in types {
            let tag = ty.tag()?;
            regs.push(counts.bump(tag));
            tags.push(tag);
        }
        Ok(Self {
            types: Arc::from(types),
            tags: Arc::from(tags),
            regs: Arc::from(regs),
            counts,
        })
    }

    pub fn empty() -> Self {
        Self {
            types: Arc::from(Vec::new()),
            tags: Arc::from(Vec::new()),
            regs: Arc::from(Vec::new()),
            counts: RegisterCounts::default(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn types(&self) -> &[BType] {
        &self.types
    }

    pub fn tags(&self) -> &[ValueTag] {
        &self.tags
    }

    pub fn regs(&self) -> &[usize] {
        &self.regs
    }

    pub fn counts(&self) -> &RegisterCounts {
        &self.counts
    }
}

/// Per-activation primitive storage, one fixed-size bank per register category.
///
/// Banks are sized once at construction and never resized. Indexing past a bank is a
/// contract violation of the layout that produced the index and panics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterFile {
    pub longs: Box<[i64]>,
    pub doubles: Box<[f64]>,
    pub strings: Box<[Arc<str>]>,
    pub ints: Box<[i32]>,
    pub blobs: Box<[Arc<[u8]>]>,
    pub refs: Box<[BRef]>,
}

impl RegisterFile {
    pub fn new(counts: &RegisterCounts) -> Self {
        let empty_str: Arc<str> = Arc::from("");
        let empty_blob: Arc<[u8]> = Arc::from(Vec::new());
        Self {
            longs: vec![0; counts.longs].into_boxed_slice(),
            doubles: vec![0.0; counts.doubles].into_boxed_slice(),
            strings: vec![empty_str; counts.strings].into_boxed_slice(),
            ints: vec![0; counts.ints].into_boxed_slice(),
            blobs: vec![empty_blob; counts.blobs].into_boxed_slice(),
            refs: vec![BRef::Nil; counts.refs].into_boxed_slice(),
        }
    }

    pub fn counts(&self) -> RegisterCounts {
        RegisterCounts {
            longs: self.longs.len(),
            doubles: self.doubles.len(),
            strings: self.strings.len(),
            ints: self.ints.len(),
            blobs: self.blobs.len(),
            refs: self.refs.len(),
        }
    }

    /// Unwrap `value` into slot `idx` of the bank selected by `tag`.
    ///
    /// Returns the value's actual tag as the error when it does not belong to `tag`'s bank.
    #[inline]
    pub fn store(&mut self, tag: ValueTag, idx: usize, value: &BValue) -> Result<(), ValueTag> {
        match (tag, value) {
            (ValueTag::Int, BValue::Int(i)) => self.longs[idx] = *i,
            (ValueTag::Float, BValue::Float(f)) => self.doubles[idx] = *f,
            (ValueTag::Str, BValue::Str(s)) => self.strings[idx] = s.clone(),
            (ValueTag::Bool, BValue::Bool(b)) => self.ints[idx] = i32::from(*b),
            (ValueTag::Blob, BValue::Blob(bytes)) => self.blobs[idx] = bytes.clone(),
            (ValueTag::Ref, BValue::Ref(r)) => self.refs[idx] = r.clone(),
            (_, other) => return Err(other.tag()),
        }
        Ok(())
    }

    /// Wrap slot `idx` of `tag`'s bank into a boxed value.
    #[inline]
    pub fn load(&self, tag: ValueTag, idx: usize) -> BValue {
        match tag {
            ValueTag::Int => BValue::Int(self.longs[idx]),
            ValueTag::Float => BValue::Float(self.doubles[idx]),
            ValueTag::Str => BValue::Str(self.strings[idx].clone()),
            ValueTag::Bool => BValue::Bool(self.ints[idx] == 1),
            ValueTag::Blob => BValue::Blob(self.blobs[idx].clone()),
            ValueTag::Ref => BValue::Ref(self.refs[idx].clone()),
        }
    }

    /// Like [`RegisterFile::load`], but `None` when `idx` lies past the end of `tag`'s bank.
    pub fn get(&self, tag: ValueTag, idx: usize) -> Option<BValue> {
        (idx < self.counts().get(tag)).then(|| self.load(tag, idx))
    }

    /// Copy one slot of `tag`'s bank from `src` into `self`.
    #[inline]
    pub fn copy_slot(&mut self, tag: ValueTag, dst_idx: usize, src: &RegisterFile, src_idx: usize) {
        match tag {
            ValueTag::Int => self.longs[dst_idx] = src.longs[src_idx],
            ValueTag::Float => self.doubles[dst_idx] = src.doubles[src_idx],
            ValueTag::Str => self.strings[dst_idx] = src.strings[src_idx].clone(),
            ValueTag::Bool => self.ints[dst_idx] = src.ints[src_idx],
            ValueTag::Blob => self.blobs[dst_idx] = src.blobs[src_idx].clone(),
            ValueTag::Ref => self.refs[dst_idx] = src.refs[src_idx].clone(),
        }
    }
}
