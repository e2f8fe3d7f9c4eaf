use super::{ProcessRecord, ProcessTable, filetime_to_system_time, launch_detached};
use crate::error::Error;
use crate::native::win32::os_error;
use std::ffi::OsString;
use std::io;
use std::os::windows::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use windows::Win32::Foundation::{CloseHandle, ERROR_NO_MORE_FILES, FILETIME, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    GetProcessTimes, OpenProcess, PROCESS_ACCESS_RIGHTS, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, QueryFullProcessImageNameW,
    TerminateProcess,
};
use windows::core::PWSTR;

/// Closes the wrapped handle on drop.
struct Handle(HANDLE);

impl Drop for Handle {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        let _ = unsafe { CloseHandle(self.0) };
    }
}

fn open(pid: u32, access: PROCESS_ACCESS_RIGHTS, op: &'static str) -> Result<Handle, Error> {
    #[allow(unsafe_code)]
    let handle = unsafe { OpenProcess(access, false, pid) }.map_err(|err| Error::Process {
        pid,
        op,
        source: os_error(err),
    })?;
    Ok(Handle(handle))
}

fn utf16_until_nul(units: &[u16]) -> String {
    let len = units.iter().position(|unit| *unit == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..len])
}

/// [`ProcessTable`] backed by Toolhelp and the process APIs in `kernel32`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Processes;

impl ProcessTable for Win32Processes {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error> {
        #[allow(unsafe_code)]
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
            .map_err(|err| Error::Snapshot(os_error(err)))?;
        let snapshot = Handle(snapshot);

        let mut entry = PROCESSENTRY32W {
            dwSize: size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        let mut processes = Vec::new();

        #[allow(unsafe_code)]
        let first = unsafe { Process32FirstW(snapshot.0, &mut entry) };
        let mut more = match first {
            Ok(()) => true,
            Err(err) if err.code() == ERROR_NO_MORE_FILES.to_hresult() => false,
            Err(err) => return Err(Error::Snapshot(os_error(err))),
        };
        while more {
            processes.push(ProcessRecord {
                pid: entry.th32ProcessID,
                name: utf16_until_nul(&entry.szExeFile),
            });
            #[allow(unsafe_code)]
            {
                more = unsafe { Process32NextW(snapshot.0, &mut entry) }.is_ok();
            }
        }

        Ok(processes)
    }

    fn creation_time(&self, pid: u32) -> Result<SystemTime, Error> {
        let process = open(pid, PROCESS_QUERY_LIMITED_INFORMATION, "query times of")?;
        let mut creation = FILETIME::default();
        let mut exit = FILETIME::default();
        let mut kernel = FILETIME::default();
        let mut user = FILETIME::default();

        #[allow(unsafe_code)]
        let queried =
            unsafe { GetProcessTimes(process.0, &mut creation, &mut exit, &mut kernel, &mut user) };
        queried.map_err(|err| Error::Process {
            pid,
            op: "query times of",
            source: os_error(err),
        })?;

        let ticks = (u64::from(creation.dwHighDateTime) << 32) | u64::from(creation.dwLowDateTime);
        filetime_to_system_time(ticks).ok_or_else(|| Error::Process {
            pid,
            op: "query times of",
            source: io::Error::new(io::ErrorKind::InvalidData, "creation time before 1970"),
        })
    }

    fn image_path(&self, pid: u32) -> Result<PathBuf, Error> {
        let process = open(pid, PROCESS_QUERY_LIMITED_INFORMATION, "query image of")?;
        let mut buffer = vec![0u16; 32 * 1024];
        let mut len = buffer.len() as u32;

        #[allow(unsafe_code)]
        let queried = unsafe {
            QueryFullProcessImageNameW(
                process.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )
        };
        queried.map_err(|err| Error::Process {
            pid,
            op: "query image of",
            source: os_error(err),
        })?;

        buffer.truncate(len as usize);
        Ok(PathBuf::from(OsString::from_wide(&buffer)))
    }

    fn terminate(&self, pid: u32, exit_code: u32) -> Result<(), Error> {
        let process = open(pid, PROCESS_TERMINATE, "terminate")?;
        #[allow(unsafe_code)]
        let terminated = unsafe { TerminateProcess(process.0, exit_code) };
        terminated.map_err(|err| Error::Process {
            pid,
            op: "terminate",
            source: os_error(err),
        })
    }

    fn launch(&self, path: &Path) -> Result<u32, Error> {
        launch_detached(path)
    }
}
