use crate::error::Error;
use crate::native::{self, DuplicateOptions, OwnedHandle, ProcessAccess};
use crate::resolver::{HandleRecord, HandleResolver};
use tracing::{debug, info};

/// Closes handles inside processes this one does not control.
pub trait ObjectCloser: Send + Sync {
    /// Close every handle in `pid` whose object name contains `name` and
    /// return how many were closed.
    fn close_by_name(&self, pid: u32, name: &str) -> Result<usize, Error>;
}

pub struct HandleCloser {
    resolver: HandleResolver,
}

impl HandleCloser {
    pub fn new(resolver: HandleResolver) -> Self {
        Self { resolver }
    }

    /// Duplicating with `CLOSE_SOURCE` and no target closes the handle in its
    /// owner without producing a copy.
    fn close_remote(&self, record: &HandleRecord) -> Result<(), Error> {
        let api = self.resolver.api();
        let owner = OwnedHandle::open_process(api, record.owner_pid, ProcessAccess::DUP_HANDLE)?;
        native::duplicate_handle(
            &**api,
            owner.raw(),
            record.raw_handle,
            None,
            DuplicateOptions::CLOSE_SOURCE,
        )?;
        Ok(())
    }
}

impl ObjectCloser for HandleCloser {
    fn close_by_name(&self, pid: u32, name: &str) -> Result<usize, Error> {
        let records = self.resolver.find_handles(pid, name)?;
        if records.is_empty() {
            return Err(Error::NotFound {
                pid,
                name: name.to_owned(),
            });
        }

        let mut closed = 0;
        let mut last_error = None;
        for record in &records {
            match self.close_remote(record) {
                Ok(()) => {
                    closed += 1;
                    info!(pid, handle = %record.raw_handle, name = %record.name, "closed remote handle");
                }
                Err(err) => {
                    debug!(pid, handle = %record.raw_handle, error = %err, "failed to close remote handle");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(source) if closed == 0 => Err(Error::NoneClosed {
                pid,
                attempted: records.len(),
                source: Box::new(source),
            }),
            _ => Ok(closed),
        }
    }
}
