use crate::error::Error;
use crate::name_query::NameQuery;
use crate::native::{self, BufferPolicy, DuplicateOptions, HandleEntry, NtApi, OwnedHandle, ProcessAccess, RawHandle};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// The only object type whose name is worth asking for.
///
/// Name queries against pipes and some file objects can hang, so the
/// resolver decides once per handle whether to risk one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Event,
    Other,
}

impl ObjectKind {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "Event" => Self::Event,
            _ => Self::Other,
        }
    }
}

/// A handle in another process whose object name matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRecord {
    pub owner_pid: u32,
    /// Handle value inside the owner, not in this process.
    pub raw_handle: RawHandle,
    pub name: String,
    pub type_name: String,
}

pub struct HandleResolver {
    api: Arc<dyn NtApi>,
    policy: BufferPolicy,
    names: NameQuery,
    /// `(owner, handle)` pairs whose name query timed out. Skipped until the
    /// handle disappears from the system handle table.
    stuck: Mutex<HashSet<(u32, RawHandle)>>,
}

impl HandleResolver {
    pub fn new(api: Arc<dyn NtApi>, policy: BufferPolicy, name_timeout: Duration) -> Self {
        let names = NameQuery::new(Arc::clone(&api), name_timeout);
        Self {
            api,
            policy,
            names,
            stuck: Mutex::new(HashSet::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn NtApi> {
        &self.api
    }

    /// Handles owned by `pid` whose object name contains `needle`.
    ///
    /// Handles of every other process are filtered out before anything is
    /// duplicated. An empty result is not an error.
    pub fn find_handles(&self, pid: u32, needle: &str) -> Result<Vec<HandleRecord>, Error> {
        let table = native::query_system_handles(&*self.api, &self.policy)?;
        let candidates: Vec<HandleEntry> = {
            let mut stuck = self.stuck.lock().unwrap_or_else(PoisonError::into_inner);
            stuck.retain(|(owner, handle)| {
                table.owned_by(*owner).any(|entry| entry.handle == *handle)
            });
            table
                .owned_by(pid)
                .filter(|entry| !stuck.contains(&(pid, entry.handle)))
                .collect()
        };
        trace!(pid, total = table.len(), candidates = candidates.len(), "handle table scanned");
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let process = OwnedHandle::open_process(&self.api, pid, ProcessAccess::DUP_HANDLE)?;
        let mut found = Vec::new();
        for entry in candidates {
            match self.inspect(&process, pid, entry.handle, needle) {
                Ok(Some(record)) => found.push(record),
                Ok(None) => {}
                Err(err @ Error::NameQueryTimedOut { .. }) => {
                    debug!(pid, handle = %entry.handle, error = %err, "skipping stuck handle from now on");
                    self.stuck
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert((pid, entry.handle));
                }
                Err(err) => trace!(pid, handle = %entry.handle, error = %err, "skipping handle"),
            }
        }

        if !found.is_empty() {
            debug!(pid, matches = found.len(), needle, "matching handles found");
        }
        Ok(found)
    }

    fn inspect(
        &self,
        process: &OwnedHandle,
        pid: u32,
        handle: RawHandle,
        needle: &str,
    ) -> Result<Option<HandleRecord>, Error> {
        let duplicate = native::duplicate_handle(
            &*self.api,
            process.raw(),
            handle,
            Some(self.api.current_process()),
            DuplicateOptions::SAME_ACCESS,
        )?;
        let Some(duplicate) = duplicate else {
            return Ok(None);
        };
        let local = OwnedHandle::new(Arc::clone(&self.api), duplicate);

        let type_name = native::query_object_type(&*self.api, local.raw())?;
        if ObjectKind::from_type_name(&type_name) != ObjectKind::Event {
            return Ok(None);
        }

        // The worker closes `local` once the query returns.
        let name = self.names.query(local)?;
        if !matches_name(&name, needle) {
            return Ok(None);
        }

        Ok(Some(HandleRecord {
            owner_pid: pid,
            raw_handle: handle,
            name,
            type_name,
        }))
    }
}

/// Object names carry a session prefix such as `\Sessions\1\BaseNamedObjects\`,
/// so the needle may appear anywhere in the path.
fn matches_name(name: &str, needle: &str) -> bool {
    !name.is_empty() && !needle.is_empty() && name.contains(needle)
}
