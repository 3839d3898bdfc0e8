//! Script arrays seen from the host.
//!
//! Indexing accepts negative positions counted from the end. Slices follow
//! sequence slicing rules: a contiguous slice (step 1) assigned or deleted
//! splices, shifting trailing elements and updating `length`; an extended
//! slice touches exactly the addressed indices and never resizes. Holes read
//! as `undefined`.

use std::ops::{Deref, Range};

use otter_embed_core::{PropertyKey, ScriptValue};

use crate::error::{EmbedError, EmbedResult};
use crate::marshal;
use crate::object::JsObject;
use crate::value::Value;

/// Largest array length the engine can represent.
const MAX_LENGTH: usize = u32::MAX as usize;

/// Engine index for a position, rejecting anything past the last valid slot.
fn element_index(index: usize, length: usize) -> EmbedResult<u32> {
    match u32::try_from(index) {
        Ok(i) if (i as usize) < MAX_LENGTH => Ok(i),
        _ => Err(EmbedError::IndexOutOfRange {
            index: i64::try_from(index).unwrap_or(i64::MAX),
            length,
        }),
    }
}

/// Slice bounds with optional negative positions and step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slice {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    pub fn new(start: Option<i64>, stop: Option<i64>) -> Self {
        Self { start, stop, step: None }
    }

    /// `[..]`
    pub fn full() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    fn step_or_default(&self) -> EmbedResult<i64> {
        match self.step.unwrap_or(1) {
            0 => Err(EmbedError::ZeroSliceStep),
            step => Ok(step),
        }
    }

    /// Start, stop and step clamped to a sequence of `len`.
    fn adjust(&self, len: usize) -> EmbedResult<(i64, i64, i64)> {
        let step = self.step_or_default()?;
        let len = len as i64;
        let clamp = |bound: Option<i64>, default: i64| match bound {
            None => default,
            Some(mut i) => {
                if i < 0 {
                    i += len;
                    if i < 0 {
                        i = if step < 0 { -1 } else { 0 };
                    }
                } else if i >= len {
                    i = if step < 0 { len - 1 } else { len };
                }
                i
            }
        };
        let (start, stop) = if step > 0 {
            (clamp(self.start, 0), clamp(self.stop, len))
        } else {
            (clamp(self.start, len - 1), clamp(self.stop, -1))
        };
        Ok((start, stop, step))
    }

    /// Indices addressed in a sequence of `len`, in slice order.
    pub fn indices(&self, len: usize) -> EmbedResult<Vec<usize>> {
        let (start, stop, step) = self.adjust(len)?;
        let count = if step > 0 {
            if start < stop { (stop - start - 1) / step + 1 } else { 0 }
        } else if stop < start {
            (start - stop - 1) / -step + 1
        } else {
            0
        };
        Ok((0..count).map(|i| (start + i * step) as usize).collect())
    }

    /// Bounds of a contiguous assignment. The start is not clamped to the
    /// length, so assigning past the end pads with `undefined`.
    fn splice_bounds(&self, len: usize) -> (usize, usize) {
        let len = len as i64;
        let resolve = |bound: Option<i64>, default: i64| match bound {
            None => default,
            Some(i) if i < 0 => (i + len).max(0),
            Some(i) => i,
        };
        let start = resolve(self.start, 0);
        let stop = resolve(self.stop, len).min(len).max(start);
        (start as usize, stop as usize)
    }
}

impl From<Range<i64>> for Slice {
    fn from(range: Range<i64>) -> Self {
        Self::new(Some(range.start), Some(range.end))
    }
}

/// A script array.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsArray {
    object: JsObject,
}

impl JsArray {
    pub(crate) fn from_object(object: JsObject) -> Self {
        Self { object }
    }

    pub fn into_object(self) -> JsObject {
        self.object
    }

    pub fn len(&self) -> usize {
        self.object.context().isolate().ensure_locked();
        self.object.context().backend().array_length(self.id()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, index: i64, len: usize) -> EmbedResult<u32> {
        let resolved = if index < 0 { index + len as i64 } else { index };
        if resolved < 0 || resolved >= len as i64 {
            return Err(EmbedError::IndexOutOfRange { index, length: len });
        }
        element_index(resolved as usize, len)
    }

    fn raw_get(&self, index: u32) -> EmbedResult<ScriptValue> {
        self.engine(|backend, ctx| backend.get(ctx, self.id(), &PropertyKey::Index(index)))
    }

    fn raw_set(&self, index: u32, value: ScriptValue) -> EmbedResult<()> {
        self.engine(|backend, ctx| backend.set(ctx, self.id(), &PropertyKey::Index(index), value))
    }

    fn raw_delete(&self, index: u32) -> EmbedResult<bool> {
        self.engine(|backend, ctx| backend.delete(ctx, self.id(), &PropertyKey::Index(index)))
    }

    fn raw_has(&self, index: u32) -> EmbedResult<bool> {
        self.engine(|backend, ctx| backend.has(ctx, self.id(), &PropertyKey::Index(index)))
    }

    fn set_len(&self, len: usize) -> EmbedResult<()> {
        let length = u32::try_from(len).map_err(|_| EmbedError::IndexOutOfRange {
            index: i64::try_from(len).unwrap_or(i64::MAX),
            length: len,
        })?;
        self.object.context().backend().set_array_length(self.id(), length);
        Ok(())
    }

    /// Element at `index`; holes read as `undefined`.
    pub fn get(&self, index: i64) -> EmbedResult<Value> {
        let index = self.resolve(index, self.len())?;
        let value = self.raw_get(index)?;
        Ok(marshal::to_host(self.object.context(), &value))
    }

    /// Assign at `index`. Writing past the end fills the gap with `undefined`.
    pub fn set(&self, index: i64, value: impl Into<Value>) -> EmbedResult<()> {
        let len = self.len();
        let value = marshal::to_script(self.object.context(), &value.into())?;
        if index < 0 {
            let index = self.resolve(index, len)?;
            return self.raw_set(index, value);
        }
        let target = usize::try_from(index)
            .map_err(|_| EmbedError::IndexOutOfRange { index, length: len })
            .and_then(|i| element_index(i, len))?;
        for gap in u32::try_from(len).unwrap_or(u32::MAX)..target {
            self.raw_set(gap, ScriptValue::Undefined)?;
        }
        self.raw_set(target, value)
    }

    /// Clear `index` without shifting or resizing.
    pub fn delete(&self, index: i64) -> EmbedResult<()> {
        let index = self.resolve(index, self.len())?;
        self.raw_delete(index)?;
        Ok(())
    }

    pub fn push(&self, value: impl Into<Value>) -> EmbedResult<()> {
        let len = self.len();
        self.set(len as i64, value)
    }

    pub fn get_slice(&self, slice: impl Into<Slice>) -> EmbedResult<Vec<Value>> {
        let indices = slice.into().indices(self.len())?;
        indices.into_iter().map(|i| self.get(i as i64)).collect()
    }

    /// Assign a slice.
    ///
    /// A contiguous slice is replaced by `values` whatever their count. An
    /// extended slice needs exactly one value per addressed index.
    pub fn set_slice(&self, slice: impl Into<Slice>, values: Vec<Value>) -> EmbedResult<()> {
        let slice = slice.into();
        let len = self.len();
        let ctx = self.object.context();
        let values = marshal::to_script_args(ctx, &values)?;

        if slice.step_or_default()? != 1 {
            let indices = slice.indices(len)?;
            if indices.len() != values.len() {
                return Err(EmbedError::SliceSize {
                    expected: indices.len(),
                    actual: values.len(),
                });
            }
            for (index, value) in indices.into_iter().zip(values) {
                self.raw_set(element_index(index, len)?, value)?;
            }
            return Ok(());
        }

        let (start, stop) = slice.splice_bounds(len);
        let new_len = start
            .saturating_add(values.len())
            .saturating_add(len.saturating_sub(stop));
        if new_len > MAX_LENGTH {
            return Err(EmbedError::IndexOutOfRange {
                index: i64::try_from(start).unwrap_or(i64::MAX),
                length: len,
            });
        }
        let mut elements = self.snapshot(len)?;
        let tail = elements.split_off(stop.min(elements.len()));
        elements.truncate(start);
        elements.resize(start, Some(ScriptValue::Undefined));
        elements.extend(values.into_iter().map(Some));
        elements.extend(tail);
        self.write_back(elements)
    }

    /// Delete a slice: contiguous slices close the gap, extended slices
    /// leave holes.
    pub fn delete_slice(&self, slice: impl Into<Slice>) -> EmbedResult<()> {
        let slice = slice.into();
        let len = self.len();
        let indices = slice.indices(len)?;

        if slice.step_or_default()? != 1 {
            for index in indices {
                self.raw_delete(element_index(index, len)?)?;
            }
            return Ok(());
        }

        let Some((&first, &last)) = indices.first().zip(indices.last()) else {
            return Ok(());
        };
        let mut elements = self.snapshot(len)?;
        elements.drain(first..=last);
        self.write_back(elements)
    }

    /// Current elements; holes are `None`.
    fn snapshot(&self, len: usize) -> EmbedResult<Vec<Option<ScriptValue>>> {
        (0..u32::try_from(len).unwrap_or(u32::MAX))
            .map(|i| {
                if self.raw_has(i)? {
                    self.raw_get(i).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    fn write_back(&self, elements: Vec<Option<ScriptValue>>) -> EmbedResult<()> {
        let len = elements.len();
        self.set_len(0)?;
        for (i, element) in elements.into_iter().enumerate() {
            if let Some(value) = element {
                self.raw_set(element_index(i, len)?, value)?;
            }
        }
        self.set_len(len)
    }

    pub fn contains(&self, value: &Value) -> EmbedResult<bool> {
        Ok(self.to_vec()?.iter().any(|item| item == value))
    }

    pub fn to_vec(&self) -> EmbedResult<Vec<Value>> {
        self.get_slice(Slice::full())
    }
}

impl Deref for JsArray {
    type Target = JsObject;

    fn deref(&self) -> &JsObject {
        &self.object
    }
}

impl std::fmt::Debug for JsArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsArray({})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Slice {
        Slice { start, stop, step }
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(Slice::from(1..4).indices(10).unwrap(), vec![1, 2, 3]);
        assert_eq!(Slice::from(-3..-1).indices(10).unwrap(), vec![7, 8]);
        assert_eq!(s(None, None, Some(3)).indices(10).unwrap(), vec![0, 3, 6, 9]);
        assert_eq!(s(None, None, Some(-1)).indices(4).unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(s(Some(8), Some(2), Some(-2)).indices(10).unwrap(), vec![8, 6, 4]);
        assert_eq!(Slice::from(5..50).indices(7).unwrap(), vec![5, 6]);
        assert!(Slice::from(4..1).indices(10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_step() {
        let err = Slice::full().step(0).indices(3).unwrap_err();
        assert!(matches!(err, EmbedError::ZeroSliceStep));
    }

    #[test]
    fn test_element_index_bounds() {
        assert_eq!(element_index(0, 0).unwrap(), 0);
        assert_eq!(element_index(MAX_LENGTH - 1, 3).unwrap(), u32::MAX - 1);
        assert!(matches!(
            element_index(MAX_LENGTH, 3),
            Err(EmbedError::IndexOutOfRange { length: 3, .. })
        ));
        assert!(matches!(
            element_index(1 << 32, 3),
            Err(EmbedError::IndexOutOfRange { index, .. }) if index == 1 << 32
        ));
    }

    #[test]
    fn test_splice_bounds() {
        assert_eq!(Slice::from(2..4).splice_bounds(0), (2, 2));
        assert_eq!(Slice::from(1..4).splice_bounds(4), (1, 4));
        assert_eq!(Slice::from(0..7).splice_bounds(2), (0, 2));
        assert_eq!(Slice::from(-2..-1).splice_bounds(5), (3, 4));
        assert_eq!(Slice::from(-9..1).splice_bounds(5), (0, 1));
    }
}
