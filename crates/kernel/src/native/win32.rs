use super::{DuplicateOptions, NtApi, NtStatus, ObjectInfoClass, ProcessAccess, QueryResult, RawHandle};
use ntapi::ntexapi::{NtQuerySystemInformation, SystemExtendedHandleInformation};
use ntapi::ntobapi::{NtDuplicateObject, NtQueryObject, ObjectNameInformation, ObjectTypeInformation};
use std::ffi::c_void;
use std::io;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_ACCESS_RIGHTS};

/// [`NtApi`] backed by `ntdll` and `kernel32`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsNt;

fn to_ptr(handle: RawHandle) -> *mut c_void {
    handle.0 as *mut c_void
}

fn from_handle(handle: HANDLE) -> RawHandle {
    RawHandle(handle.0 as usize)
}

fn info_class(class: ObjectInfoClass) -> u32 {
    match class {
        ObjectInfoClass::Name => ObjectNameInformation,
        ObjectInfoClass::Type => ObjectTypeInformation,
    }
}

fn buffer_len(buffer: &[u8]) -> u32 {
    u32::try_from(buffer.len()).unwrap_or(u32::MAX)
}

impl NtApi for WindowsNt {
    fn query_system_information(&self, buffer: &mut [u8]) -> QueryResult {
        let mut return_length = 0u32;
        #[allow(unsafe_code)]
        let status = unsafe {
            NtQuerySystemInformation(
                SystemExtendedHandleInformation,
                buffer.as_mut_ptr().cast(),
                buffer_len(buffer),
                &mut return_length,
            )
        };
        QueryResult {
            status: NtStatus(status),
            return_length,
        }
    }

    fn query_object(&self, handle: RawHandle, class: ObjectInfoClass, buffer: &mut [u8]) -> QueryResult {
        let mut return_length = 0u32;
        #[allow(unsafe_code)]
        let status = unsafe {
            NtQueryObject(
                to_ptr(handle).cast(),
                info_class(class),
                buffer.as_mut_ptr().cast(),
                buffer_len(buffer),
                &mut return_length,
            )
        };
        QueryResult {
            status: NtStatus(status),
            return_length,
        }
    }

    fn duplicate_object(
        &self,
        source_process: RawHandle,
        source: RawHandle,
        target_process: Option<RawHandle>,
        options: DuplicateOptions,
    ) -> Result<Option<RawHandle>, NtStatus> {
        let mut target: *mut c_void = std::ptr::null_mut();
        let target_process = target_process.map_or(std::ptr::null_mut(), to_ptr);
        let target_slot: *mut *mut c_void = if target_process.is_null() {
            std::ptr::null_mut()
        } else {
            &raw mut target
        };

        #[allow(unsafe_code)]
        let status = NtStatus(unsafe {
            NtDuplicateObject(
                to_ptr(source_process).cast(),
                to_ptr(source).cast(),
                target_process.cast(),
                target_slot.cast(),
                0,
                0,
                options.bits(),
            )
        });

        if !status.is_success() {
            return Err(status);
        }
        if target.is_null() {
            Ok(None)
        } else {
            Ok(Some(RawHandle(target as usize)))
        }
    }

    fn open_process(&self, pid: u32, access: ProcessAccess) -> Result<RawHandle, io::Error> {
        #[allow(unsafe_code)]
        let handle = unsafe { OpenProcess(PROCESS_ACCESS_RIGHTS(access.bits()), false, pid) }
            .map_err(os_error)?;
        Ok(from_handle(handle))
    }

    fn current_process(&self) -> RawHandle {
        #[allow(unsafe_code)]
        let handle = unsafe { GetCurrentProcess() };
        from_handle(handle)
    }

    fn close_handle(&self, handle: RawHandle) {
        if handle == self.current_process() || handle.0 == 0 {
            return;
        }
        #[allow(unsafe_code)]
        let result = unsafe { CloseHandle(HANDLE(to_ptr(handle))) };
        if let Err(err) = result {
            tracing::trace!(%handle, error = %err, "CloseHandle failed");
        }
    }
}

/// Map a `windows` error onto the matching `io::Error`.
pub(crate) fn os_error(err: windows::core::Error) -> io::Error {
    // HRESULT_FROM_WIN32 keeps the Win32 code in the low word.
    let code = (err.code().0 as u32 & 0xFFFF) as i32;
    io::Error::from_raw_os_error(code)
}
