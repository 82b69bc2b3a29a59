use std::thread;

use crate::error::{Error, Result};

// Thread names are handed to the OS; an interior NUL makes `Builder::spawn` panic.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("thread name must not be empty".into()));
    }
    if name.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "thread name {name:?} contains a NUL byte"
        )));
    }
    Ok(())
}

/// Starts a detached, named background thread.
///
/// The thread is never joined, so it does not keep the process alive once
/// `main` returns.
pub(crate) fn spawn_detached<F>(name: &str, body: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    validate_name(name)?;
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map(drop)
        .map_err(|source| Error::Spawn {
            name: name.to_string(),
            source,
        })
}
