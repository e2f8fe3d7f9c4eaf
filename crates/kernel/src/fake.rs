//! In-memory [`NtApi`] for unit tests.

use crate::native::{
    DuplicateOptions, HandleEntry, NtApi, NtStatus, ObjectInfoClass, ProcessAccess, QueryResult,
    RawHandle, encode,
};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const CURRENT_PROCESS: RawHandle = RawHandle(usize::MAX);

#[derive(Debug, Clone)]
struct Object {
    type_name: String,
    name: String,
}

#[derive(Default)]
struct State {
    /// Live handles inside other processes, keyed by (owner, handle).
    remote: Vec<(u32, RawHandle, Object)>,
    /// Handles owned by the test process.
    local: HashMap<RawHandle, Object>,
    process_handles: HashMap<RawHandle, u32>,
    denied: HashSet<u32>,
    failing_closes: HashSet<(u32, RawHandle)>,
    slow_names: HashMap<String, Duration>,
    closed: HashSet<RawHandle>,
    /// Owner pids of every handle that was duplicated for inspection.
    inspected: Vec<u32>,
    opened: Vec<u32>,
    name_queries: usize,
    remote_closes: usize,
    next: usize,
}

impl State {
    fn allocate(&mut self) -> RawHandle {
        self.next += 4;
        RawHandle(0x10_0000 + self.next)
    }
}

pub(crate) struct FakeNt {
    state: Mutex<State>,
}

impl FakeNt {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_remote(&self, pid: u32, handle: usize, type_name: &str, name: &str) {
        self.state().remote.push((
            pid,
            RawHandle(handle),
            Object {
                type_name: type_name.into(),
                name: name.into(),
            },
        ));
    }

    pub(crate) fn add_local(&self, handle: RawHandle, type_name: &str, name: &str) -> RawHandle {
        self.state().local.insert(
            handle,
            Object {
                type_name: type_name.into(),
                name: name.into(),
            },
        );
        handle
    }

    pub(crate) fn deny(&self, pid: u32) {
        self.state().denied.insert(pid);
    }

    /// Drop every handle owned by `pid`, as if the process had exited.
    pub(crate) fn exit(&self, pid: u32) {
        self.state().remote.retain(|(owner, _, _)| *owner != pid);
    }

    pub(crate) fn fail_close(&self, pid: u32, handle: usize) {
        self.state().failing_closes.insert((pid, RawHandle(handle)));
    }

    pub(crate) fn slow_name(&self, name: &str, delay: Duration) {
        self.state().slow_names.insert(name.into(), delay);
    }

    pub(crate) fn is_closed(&self, handle: RawHandle) -> bool {
        self.state().closed.contains(&handle)
    }

    pub(crate) fn has_remote(&self, pid: u32, handle: usize) -> bool {
        self.state()
            .remote
            .iter()
            .any(|(owner, raw, _)| *owner == pid && *raw == RawHandle(handle))
    }

    pub(crate) fn inspected(&self) -> Vec<u32> {
        self.state().inspected.clone()
    }

    pub(crate) fn opened(&self) -> Vec<u32> {
        self.state().opened.clone()
    }

    pub(crate) fn name_queries(&self) -> usize {
        self.state().name_queries
    }

    pub(crate) fn remote_closes(&self) -> usize {
        self.state().remote_closes
    }

    /// Local handles that were handed out but never closed.
    pub(crate) fn leaked(&self) -> usize {
        let state = self.state();
        state
            .local
            .keys()
            .chain(state.process_handles.keys())
            .filter(|handle| !state.closed.contains(handle))
            .count()
    }
}

impl NtApi for FakeNt {
    fn query_system_information(&self, buffer: &mut [u8]) -> QueryResult {
        let state = self.state();
        let entries: Vec<HandleEntry> = state
            .remote
            .iter()
            .enumerate()
            .map(|(index, (pid, handle, _))| HandleEntry {
                object: 0xffff_9000_0000 + index * 0x10,
                owner_pid: *pid as usize,
                handle: *handle,
                granted_access: 0x001f_0003,
                creator_back_trace_index: 0,
                object_type_index: 0,
                attributes: 0,
            })
            .collect();
        encode::handle_table(&entries, buffer)
    }

    fn query_object(&self, handle: RawHandle, class: ObjectInfoClass, buffer: &mut [u8]) -> QueryResult {
        let (object, delay) = {
            let mut state = self.state();
            let Some(object) = state.local.get(&handle).cloned() else {
                return QueryResult {
                    status: NtStatus::INVALID_HANDLE,
                    return_length: 0,
                };
            };
            let delay = match class {
                ObjectInfoClass::Name => {
                    state.name_queries += 1;
                    state.slow_names.get(&object.name).copied()
                }
                ObjectInfoClass::Type => None,
            };
            (object, delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match class {
            ObjectInfoClass::Name => encode::unicode_string(&object.name, buffer),
            ObjectInfoClass::Type => encode::unicode_string(&object.type_name, buffer),
        }
    }

    fn duplicate_object(
        &self,
        source_process: RawHandle,
        source: RawHandle,
        target_process: Option<RawHandle>,
        options: DuplicateOptions,
    ) -> Result<Option<RawHandle>, NtStatus> {
        let mut state = self.state();
        let pid = *state
            .process_handles
            .get(&source_process)
            .ok_or(NtStatus::INVALID_HANDLE)?;
        let position = state
            .remote
            .iter()
            .position(|(owner, handle, _)| *owner == pid && *handle == source)
            .ok_or(NtStatus::INVALID_HANDLE)?;

        if options.contains(DuplicateOptions::CLOSE_SOURCE) {
            if state.failing_closes.contains(&(pid, source)) {
                return Err(NtStatus::ACCESS_DENIED);
            }
            let (_, _, object) = state.remote.remove(position);
            state.remote_closes += 1;
            return match target_process {
                Some(_) => {
                    let local = state.allocate();
                    state.local.insert(local, object);
                    Ok(Some(local))
                }
                None => Ok(None),
            };
        }

        match target_process {
            Some(target) if target == CURRENT_PROCESS => {
                let object = state.remote[position].2.clone();
                state.inspected.push(pid);
                let local = state.allocate();
                state.local.insert(local, object);
                Ok(Some(local))
            }
            _ => Err(NtStatus::INVALID_HANDLE),
        }
    }

    fn open_process(&self, pid: u32, _access: ProcessAccess) -> Result<RawHandle, io::Error> {
        let mut state = self.state();
        state.opened.push(pid);
        if state.denied.contains(&pid) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if !state.remote.iter().any(|(owner, _, _)| *owner == pid) {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let handle = state.allocate();
        state.process_handles.insert(handle, pid);
        Ok(handle)
    }

    fn current_process(&self) -> RawHandle {
        CURRENT_PROCESS
    }

    fn close_handle(&self, handle: RawHandle) {
        self.state().closed.insert(handle);
    }
}
