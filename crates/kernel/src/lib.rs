#![deny(unsafe_code)]

mod closer;
mod error;
#[cfg(test)]
mod fake;
mod name_query;
pub mod native;
pub mod process;
mod resolver;

pub use closer::{HandleCloser, ObjectCloser};
pub use error::{Error, ErrorKind};
pub use name_query::NameQuery;
pub use native::{BufferPolicy, NtApi, NtStatus, RawHandle};
pub use process::{KillReport, ProcessRecord, ProcessTable};
pub use resolver::{HandleRecord, HandleResolver, ObjectKind};

use std::sync::Arc;

/// The live native API of this machine.
pub fn system_api() -> Result<Arc<dyn NtApi>, Error> {
    #[cfg(windows)]
    {
        Ok(Arc::new(native::WindowsNt))
    }
    #[cfg(not(windows))]
    {
        Err(Error::Unsupported)
    }
}

/// The live process table of this machine.
pub fn system_processes() -> Result<Arc<dyn ProcessTable>, Error> {
    #[cfg(windows)]
    {
        Ok(Arc::new(process::Win32Processes))
    }
    #[cfg(not(windows))]
    {
        Err(Error::Unsupported)
    }
}
