//! By-reference marshalling of arrays and structs
//!
//! Contents are copied into a temporary, 8-byte aligned native buffer that
//! lives for the duration of one call. Direction flags decide which way the
//! bytes travel.

use crate::types::{Annotation, AnnotationSet, ArrayValue, StructValue};

/// Copy directions for a by-reference parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Direction {
    pub copy_in: bool,
    pub copy_out: bool,
    pub nul_terminate: bool,
}

impl Direction {
    pub const IN_OUT: Self = Self {
        copy_in: true,
        copy_out: true,
        nul_terminate: false,
    };

    /// Directions declared by annotations; unannotated means both ways
    pub fn from_annotations(annotations: &AnnotationSet) -> Self {
        let has_in = annotations.contains(&Annotation::In);
        let has_out = annotations.contains(&Annotation::Out);
        let (copy_in, copy_out) = match (has_in, has_out) {
            (true, false) => (true, false),
            (false, true) => (false, true),
            _ => (true, true),
        };
        Self {
            copy_in,
            copy_out,
            nul_terminate: annotations.contains(&Annotation::NulTerminate),
        }
    }
}

/// Aligned scratch memory handed to native code
pub struct NativeBuffer {
    words: Vec<u64>,
    len: usize,
}

impl NativeBuffer {
    /// Zero-filled buffer of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; (len + 7) / 8],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: words holds at least len initialized bytes
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: words holds at least len initialized bytes
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    /// Address passed to native code
    pub fn address(&self) -> usize {
        self.words.as_ptr() as usize
    }
}

/// Copy an array into native memory
pub fn marshal_array(array: &ArrayValue, direction: Direction) -> NativeBuffer {
    array.with(|data| {
        let elem = data.element_type().size();
        let extra = if direction.nul_terminate { 1 } else { 0 };
        let mut buf = NativeBuffer::zeroed((data.len() + extra) * elem);
        if direction.copy_in {
            data.write_ne_bytes(buf.as_bytes_mut());
        }
        buf
    })
}

/// Copy native memory back into the array after the call
pub fn unmarshal_array(array: &ArrayValue, buffer: &NativeBuffer, direction: Direction) {
    if !direction.copy_out {
        return;
    }
    array.with(|data| {
        let used = data.len() * data.element_type().size();
        data.read_ne_bytes(&buffer.as_bytes()[..used]);
    });
}

/// Copy struct bytes into native memory
pub fn marshal_struct(value: &StructValue, direction: Direction) -> NativeBuffer {
    let bytes = value.bytes.lock();
    let mut buf = NativeBuffer::zeroed(value.layout.size.max(bytes.len()));
    if direction.copy_in {
        buf.as_bytes_mut()[..bytes.len()].copy_from_slice(&bytes);
    }
    buf
}

/// Copy native memory back into the struct after the call
pub fn unmarshal_struct(value: &StructValue, buffer: &NativeBuffer, direction: Direction) {
    if !direction.copy_out {
        return;
    }
    let mut bytes = value.bytes.lock();
    let n = bytes.len().min(buffer.len());
    bytes[..n].copy_from_slice(&buffer.as_bytes()[..n]);
}
