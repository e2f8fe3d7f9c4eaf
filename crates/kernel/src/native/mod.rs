//! Typed bindings over the undocumented object and handle-table calls.
//!
//! Everything here is expressed against [`NtApi`], a deliberately raw seam
//! that mirrors the native calls one to one. The buffer negotiation and the
//! parsing of the variable-length structures live on this side of the seam
//! so they behave identically on every target; only [`NtApi`]
//! implementations touch the operating system.

mod buffer;
mod layout;
#[cfg(windows)]
pub(crate) mod win32;

pub use buffer::BufferPolicy;
pub use layout::{ENTRY_STRIDE, HEADER_LEN, HandleEntry, HandleTable, WORD, decode_unicode_string};
#[cfg(windows)]
pub use win32::WindowsNt;

#[cfg(test)]
pub(crate) use layout::encode;

use crate::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Raw `NTSTATUS` value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: Self = Self(0);
    pub const BUFFER_OVERFLOW: Self = Self(0x8000_0005_u32 as i32);
    pub const INFO_LENGTH_MISMATCH: Self = Self(0xC000_0004_u32 as i32);
    pub const INVALID_HANDLE: Self = Self(0xC000_0008_u32 as i32);
    pub const INVALID_CID: Self = Self(0xC000_000B_u32 as i32);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022_u32 as i32);
    pub const BUFFER_TOO_SMALL: Self = Self(0xC000_0023_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// The call failed only because the supplied buffer was too small.
    pub fn is_size_mismatch(self) -> bool {
        matches!(
            self,
            Self::INFO_LENGTH_MISMATCH | Self::BUFFER_OVERFLOW | Self::BUFFER_TOO_SMALL
        )
    }

    pub fn is_access_denied(self) -> bool {
        self == Self::ACCESS_DENIED
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({self})")
    }
}

/// A handle value as it appears in some process's handle table.
///
/// The value is only meaningful inside the process that owns it and is never
/// dereferenced by this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawHandle(pub usize);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({self})")
    }
}

/// `OBJECT_INFORMATION_CLASS` values used by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectInfoClass {
    Name = 1,
    Type = 2,
}

bitflags::bitflags! {
    /// `DUPLICATE_*` options for `NtDuplicateObject`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DuplicateOptions: u32 {
        const CLOSE_SOURCE = 0x0000_0001;
        const SAME_ACCESS = 0x0000_0002;
    }

    /// Process access rights requested from `OpenProcess`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessAccess: u32 {
        const TERMINATE = 0x0001;
        const VM_READ = 0x0010;
        const DUP_HANDLE = 0x0040;
        const QUERY_INFORMATION = 0x0400;
        const QUERY_LIMITED_INFORMATION = 0x1000;
    }
}

/// Status and reported length of a variable-length query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    pub status: NtStatus,
    pub return_length: u32,
}

impl QueryResult {
    pub fn ok(return_length: u32) -> Self {
        Self {
            status: NtStatus::SUCCESS,
            return_length,
        }
    }

    pub fn too_small(required: u32) -> Self {
        Self {
            status: NtStatus::INFO_LENGTH_MISMATCH,
            return_length: required,
        }
    }
}

pub trait NtApi: Send + Sync {
    /// `NtQuerySystemInformation(SystemExtendedHandleInformation, ..)`.
    fn query_system_information(&self, buffer: &mut [u8]) -> QueryResult;

    /// `NtQueryObject` against a handle owned by the calling process.
    fn query_object(&self, handle: RawHandle, class: ObjectInfoClass, buffer: &mut [u8])
    -> QueryResult;

    /// `NtDuplicateObject`. Returns the new handle in `target_process`, or
    /// `None` when no target was given (the close-source form).
    fn duplicate_object(
        &self,
        source_process: RawHandle,
        source: RawHandle,
        target_process: Option<RawHandle>,
        options: DuplicateOptions,
    ) -> Result<Option<RawHandle>, NtStatus>;

    fn open_process(&self, pid: u32, access: ProcessAccess) -> Result<RawHandle, io::Error>;

    /// Pseudo handle of the calling process. Never closed.
    fn current_process(&self) -> RawHandle;

    fn close_handle(&self, handle: RawHandle);
}

/// A handle owned by the calling process, closed on drop.
pub struct OwnedHandle {
    api: Arc<dyn NtApi>,
    raw: RawHandle,
}

impl OwnedHandle {
    pub fn new(api: Arc<dyn NtApi>, raw: RawHandle) -> Self {
        Self { api, raw }
    }

    /// Open `pid` with `access`.
    pub fn open_process(api: &Arc<dyn NtApi>, pid: u32, access: ProcessAccess) -> Result<Self, Error> {
        let raw = api
            .open_process(pid, access)
            .map_err(|source| Error::OpenProcess { pid, source })?;
        Ok(Self::new(Arc::clone(api), raw))
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.api.close_handle(self.raw);
    }
}

/// Snapshot the system-wide handle table.
pub fn query_system_handles(api: &dyn NtApi, policy: &BufferPolicy) -> Result<HandleTable, Error> {
    let bytes = buffer::negotiate("NtQuerySystemInformation", policy, |buffer| {
        api.query_system_information(buffer)
    })?;
    Ok(HandleTable::parse(bytes))
}

/// Duplicate `source` out of `owner_process`.
///
/// With a target process this yields an inspectable copy. With no target and
/// [`DuplicateOptions::CLOSE_SOURCE`] it closes `source` inside its owner and
/// yields nothing.
pub fn duplicate_handle(
    api: &dyn NtApi,
    owner_process: RawHandle,
    source: RawHandle,
    target_process: Option<RawHandle>,
    options: DuplicateOptions,
) -> Result<Option<RawHandle>, Error> {
    api.duplicate_object(owner_process, source, target_process, options)
        .map_err(|status| Error::Status {
            call: "NtDuplicateObject",
            status,
        })
}

/// Type name of an object, e.g. `Event`, `File` or `Section`.
pub fn query_object_type(api: &dyn NtApi, handle: RawHandle) -> Result<String, Error> {
    query_object_string(api, handle, ObjectInfoClass::Type, 1024)
}

/// Full object manager path of a named object, or an empty string for
/// unnamed objects.
///
/// This can block forever on some object types; callers must filter by type
/// first and bound the call.
pub fn query_object_name(api: &dyn NtApi, handle: RawHandle) -> Result<String, Error> {
    query_object_string(api, handle, ObjectInfoClass::Name, 4096)
}

fn query_object_string(
    api: &dyn NtApi,
    handle: RawHandle,
    class: ObjectInfoClass,
    initial: usize,
) -> Result<String, Error> {
    let bytes = buffer::negotiate("NtQueryObject", &BufferPolicy::exact(initial), |buffer| {
        api.query_object(handle, class, buffer)
    })?;
    Ok(decode_unicode_string(&bytes).unwrap_or_default())
}
