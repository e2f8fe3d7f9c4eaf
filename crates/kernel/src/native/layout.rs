//! Byte-level views over the structures returned by the handle-table and
//! object queries.
//!
//! Nothing here reinterprets memory. Every field is read through a bounds
//! checked slice so a short or inconsistent buffer degrades to fewer entries
//! rather than undefined behaviour.

use super::RawHandle;
use std::mem::size_of;
use tracing::warn;

/// Native pointer width in bytes.
pub const WORD: usize = size_of::<usize>();

/// `NumberOfHandles` followed by `Reserved`.
pub const HEADER_LEN: usize = 2 * WORD;

/// `SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX`: three pointer-sized fields, then
/// `GrantedAccess: u32`, two `u16` indices, `HandleAttributes: u32` and a
/// trailing reserved `u32`.
pub const ENTRY_STRIDE: usize = 3 * WORD + 16;

/// One row of the system handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleEntry {
    /// Kernel address of the object. Opaque.
    pub object: usize,
    pub owner_pid: usize,
    pub handle: RawHandle,
    pub granted_access: u32,
    pub creator_back_trace_index: u16,
    pub object_type_index: u16,
    pub attributes: u32,
}

/// Parsed `SYSTEM_EXTENDED_HANDLE_INFORMATION`.
#[derive(Debug, Clone)]
pub struct HandleTable {
    bytes: Vec<u8>,
    declared: usize,
    len: usize,
}

impl HandleTable {
    pub fn parse(bytes: Vec<u8>) -> Self {
        let declared = read_usize(&bytes, 0).unwrap_or(0);
        let capacity = bytes.len().saturating_sub(HEADER_LEN) / ENTRY_STRIDE;
        let len = declared.min(capacity);
        if len < declared {
            warn!(declared, capacity, "handle table count exceeds buffer, truncating");
        }
        Self {
            bytes,
            declared,
            len,
        }
    }

    /// Number of entries that actually fit in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Count the kernel claimed, which may exceed [`Self::len`].
    pub fn declared(&self) -> usize {
        self.declared
    }

    pub fn get(&self, index: usize) -> Option<HandleEntry> {
        if index >= self.len {
            return None;
        }
        let base = HEADER_LEN + index * ENTRY_STRIDE;
        let entry = self.bytes.get(base..base + ENTRY_STRIDE)?;
        let tail = 3 * WORD;
        Some(HandleEntry {
            object: read_usize(entry, 0)?,
            owner_pid: read_usize(entry, WORD)?,
            handle: RawHandle(read_usize(entry, 2 * WORD)?),
            granted_access: read_u32(entry, tail)?,
            creator_back_trace_index: read_u16(entry, tail + 4)?,
            object_type_index: read_u16(entry, tail + 6)?,
            attributes: read_u32(entry, tail + 8)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = HandleEntry> + '_ {
        (0..self.len).filter_map(|index| self.get(index))
    }

    /// Entries whose owning process is `pid`.
    pub fn owned_by(&self, pid: u32) -> impl Iterator<Item = HandleEntry> + '_ {
        self.iter().filter(move |entry| entry.owner_pid == pid as usize)
    }
}

/// Decode the `UNICODE_STRING` at the start of an object query buffer.
///
/// The string's buffer pointer has to land inside `bytes`, which is where
/// `NtQueryObject` places it. Empty, null or out-of-range strings yield
/// `None`.
pub fn decode_unicode_string(bytes: &[u8]) -> Option<String> {
    let length = usize::from(read_u16(bytes, 0)?);
    let pointer = read_usize(bytes, WORD)?;
    if length == 0 || pointer == 0 {
        return None;
    }

    let start = pointer.checked_sub(bytes.as_ptr() as usize)?;
    let end = start.checked_add(length)?;
    let raw = bytes.get(start..end)?;

    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

fn read_usize(bytes: &[u8], offset: usize) -> Option<usize> {
    let raw = bytes.get(offset..offset + WORD)?;
    Some(usize::from_ne_bytes(raw.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(raw.try_into().ok()?))
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_ne_bytes(raw.try_into().ok()?))
}
