// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Little-endian primitives shared by the container and CPDB formats.

use thiserror::Error;

use crate::core::string_heap::{StringHeap, NO_STRING};

/// Upper bound on any decoded entry count, whatever the record size.
pub const MAX_DECODE_ENTRY_COUNT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid magic header: found {found:02X?}")]
    InvalidMagic { found: Vec<u8> },
    #[error("unsupported format version {found}")]
    UnsupportedVersion { found: u16 },
    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: String },
    #[error("unknown segment kind {found}")]
    UnknownSegment { found: u8 },
    #[error("unknown opcode {code}")]
    UnknownOpcode { code: String },
    #[error("unknown operand discriminator {found}")]
    UnknownOperand { found: u8 },
    #[error("label offset {offset} in method '{method}' is not on an instruction boundary")]
    BadLabelOffset { method: String, offset: u32 },
    #[error("string heap index {index} out of range (heap holds {len})")]
    HeapIndexOutOfRange { index: u32, len: usize },
    #[error("invalid UTF-8 in {chunk}")]
    InvalidUtf8 { chunk: String },
    #[error("count out of range: {context}")]
    CountOutOfRange { context: String },
    #[error("invalid {chunk}: {detail}")]
    InvalidFormat { chunk: String, detail: String },
    #[error("reference '{name}' was never resolved")]
    UnresolvedReference { name: String },
    #[error("operands of '{mnemonic}' do not match its definition: {detail}")]
    OperandMismatch { mnemonic: String, detail: String },
}

impl CodecError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMagic { .. } => "CPB001",
            Self::UnsupportedVersion { .. } => "CPB002",
            Self::UnexpectedEof { .. } => "CPB003",
            Self::UnknownSegment { .. } => "CPB004",
            Self::UnknownOpcode { .. } => "CPB005",
            Self::UnknownOperand { .. } => "CPB006",
            Self::BadLabelOffset { .. } => "CPB007",
            Self::HeapIndexOutOfRange { .. } => "CPB008",
            Self::InvalidUtf8 { .. } => "CPB009",
            Self::CountOutOfRange { .. } => "CPB010",
            Self::InvalidFormat { .. } => "CPB011",
            Self::UnresolvedReference { .. } => "CPB012",
            Self::OperandMismatch { .. } => "CPB013",
        }
    }
}

pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_string(out: &mut Vec<u8>, chunk: &str, value: &str) -> Result<(), CodecError> {
    let len = u32::try_from(value.len()).map_err(|_| CodecError::CountOutOfRange {
        context: format!("{chunk} string length exceeds u32"),
    })?;
    write_u32(out, len);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

pub fn u16_count(count: usize, context: &str) -> Result<u16, CodecError> {
    u16::try_from(count).map_err(|_| CodecError::CountOutOfRange {
        context: context.to_string(),
    })
}

pub fn u32_count(count: usize, context: &str) -> Result<u32, CodecError> {
    u32::try_from(count).map_err(|_| CodecError::CountOutOfRange {
        context: context.to_string(),
    })
}

/// Write a heap section: `u32` count followed by strings.
pub fn write_heap(out: &mut Vec<u8>, heap: &StringHeap) -> Result<(), CodecError> {
    write_u32(out, u32_count(heap.len(), "string heap entries")?);
    for entry in heap.entries() {
        write_string(out, "string heap", entry)?;
    }
    Ok(())
}

/// Cursor over an input buffer.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    chunk: &'static str,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8], chunk: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            chunk,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.bytes.len()
    }

    pub fn remaining_len(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    /// Format error tagged with this decoder's chunk name.
    pub fn invalid(&self, detail: impl Into<String>) -> CodecError {
        CodecError::InvalidFormat {
            chunk: self.chunk.to_string(),
            detail: detail.into(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let slice = self.read_exact(1, "u8")?;
        Ok(slice[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let slice = self.read_exact(2, "u16")?;
        Ok(u16::from_le_bytes([slice[0], slice[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let slice = self.read_exact(4, "u32")?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let slice = self.read_exact(8, "u64")?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(slice);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len, "string bytes")?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 {
            chunk: self.chunk.to_string(),
        })
    }

    /// A `u32` heap index that must name an existing entry.
    pub fn read_heap_string(&mut self, heap: &StringHeap) -> Result<String, CodecError> {
        let index = self.read_u32()?;
        heap.get(index)
            .map(str::to_string)
            .ok_or(CodecError::HeapIndexOutOfRange {
                index,
                len: heap.len(),
            })
    }

    /// A `u32` heap index that may be [`NO_STRING`].
    pub fn read_heap_string_opt(&mut self, heap: &StringHeap) -> Result<Option<String>, CodecError> {
        let index = self.read_u32()?;
        if index == NO_STRING {
            return Ok(None);
        }
        heap.get(index)
            .map(|s| Some(s.to_string()))
            .ok_or(CodecError::HeapIndexOutOfRange {
                index,
                len: heap.len(),
            })
    }

    pub fn read_exact(&mut self, len: usize, detail: &str) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| self.invalid(format!("{detail} overflow")))?;
        if end > self.bytes.len() {
            return Err(CodecError::UnexpectedEof {
                context: format!("{} {}", self.chunk, detail),
            });
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// A `u32` count whose records need at least `min_record_bytes` each.
    pub fn read_bounded_count(
        &mut self,
        min_record_bytes: usize,
        detail: &str,
    ) -> Result<usize, CodecError> {
        let count = self.read_u32()? as usize;
        self.check_count(count, min_record_bytes, detail)
    }

    pub fn read_bounded_count_u16(
        &mut self,
        min_record_bytes: usize,
        detail: &str,
    ) -> Result<usize, CodecError> {
        let count = self.read_u16()? as usize;
        self.check_count(count, min_record_bytes, detail)
    }

    fn check_count(
        &self,
        count: usize,
        min_record_bytes: usize,
        detail: &str,
    ) -> Result<usize, CodecError> {
        if count > MAX_DECODE_ENTRY_COUNT {
            return Err(self.invalid(format!(
                "{detail} count {count} exceeds hard limit {MAX_DECODE_ENTRY_COUNT}"
            )));
        }
        let needed = count.saturating_mul(min_record_bytes);
        if needed > self.remaining_len() {
            return Err(CodecError::UnexpectedEof {
                context: format!(
                    "{} {detail}: {count} entries need {needed} bytes, {} remain",
                    self.chunk,
                    self.remaining_len()
                ),
            });
        }
        Ok(count)
    }

    pub fn read_heap(&mut self) -> Result<StringHeap, CodecError> {
        let count = self.read_bounded_count(4, "string heap")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(self.read_string()?);
        }
        Ok(StringHeap::from_entries(entries))
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.bytes.len() {
            return Err(self.invalid("trailing bytes"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut out = Vec::new();
        write_u16(&mut out, 0x0102);
        write_u32(&mut out, 0x0304_0506);
        write_string(&mut out, "test", "hi").unwrap();
        assert_eq!(out, vec![2, 1, 6, 5, 4, 3, 2, 0, 0, 0, b'h', b'i']);
        let mut cur = Decoder::new(&out, "test");
        assert_eq!(cur.read_u16().unwrap(), 0x0102);
        assert_eq!(cur.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(cur.read_string().unwrap(), "hi");
        cur.finish().unwrap();
    }

    #[test]
    fn truncated_input_reports_eof() {
        let mut cur = Decoder::new(&[1, 2], "test");
        let err = cur.read_u32().unwrap_err();
        assert_eq!(err.code(), "CPB003");
    }

    #[test]
    fn counts_larger_than_remaining_input_are_rejected() {
        let mut out = Vec::new();
        write_u32(&mut out, 1000);
        let mut cur = Decoder::new(&out, "test");
        assert!(matches!(
            cur.read_bounded_count(4, "entries"),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn heap_sections_round_trip_and_check_indices() {
        let mut heap = StringHeap::new();
        heap.intern("alpha");
        heap.intern("beta");
        let mut out = Vec::new();
        write_heap(&mut out, &heap).unwrap();
        write_u32(&mut out, 1);
        write_u32(&mut out, 9);
        write_u32(&mut out, NO_STRING);
        let mut cur = Decoder::new(&out, "test");
        let read = cur.read_heap().unwrap();
        assert_eq!(read, heap);
        assert_eq!(cur.read_heap_string(&read).unwrap(), "beta");
        assert_eq!(
            cur.read_heap_string(&read).unwrap_err(),
            CodecError::HeapIndexOutOfRange { index: 9, len: 2 }
        );
        assert_eq!(cur.read_heap_string_opt(&read).unwrap(), None);
    }

    #[test]
    fn invalid_utf8_and_trailing_bytes() {
        let mut cur = Decoder::new(&[1, 0, 0, 0, 0xFF, 7], "test");
        assert!(matches!(cur.read_string(), Err(CodecError::InvalidUtf8 { .. })));
        assert_eq!(cur.finish().unwrap_err().code(), "CPB011");
    }
}
