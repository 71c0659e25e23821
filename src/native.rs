//! Native provider loading
//!
//! Builds a provider's handler table from a shared library exporting the
//! C-ABI phonebook handlers:
//!
//! ```c
//! long addHandler(struct FixedRecord* record);
//! long getHandler(const char* key, unsigned int len, struct FixedRecord* out);
//! long deleteHandler(const char* key, unsigned int len);
//! ```
//!
//! Symbols are resolved once, at load time. Every handler closure holds a
//! reference to the library, so the code stays mapped for as long as any
//! copy of the handler table (and therefore any pin) is alive.

use std::ffi::CString;
use std::os::raw::{c_char, c_long, c_uint};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HandlerNames;
use crate::provider::{Handler, Provider};
use crate::record::FixedRecord;

/// `long addHandler(FixedRecord*)`
pub type RawAddHandler = unsafe extern "C" fn(*mut FixedRecord) -> c_long;
/// `long getHandler(const char*, unsigned int, FixedRecord*)`
pub type RawGetHandler = unsafe extern "C" fn(*const c_char, c_uint, *mut FixedRecord) -> c_long;
/// `long deleteHandler(const char*, unsigned int)`
pub type RawDeleteHandler = unsafe extern "C" fn(*const c_char, c_uint) -> c_long;

/// Native loading errors
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("failed to load '{}': {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("'{}' exports none of the phonebook handlers", path.display())]
    NoHandlers { path: PathBuf },
    #[error("invalid symbol name '{0}'")]
    InvalidSymbol(String),
}

/// Load a provider named `name` from the shared library at `path`.
///
/// Handlers the library does not export are left out of the table; calls
/// that need them fail resolution instead of failing the load.
pub fn load_provider(
    name: &str,
    path: impl AsRef<Path>,
    names: &HandlerNames,
) -> Result<Provider, NativeError> {
    let path = path.as_ref().to_path_buf();

    // Safety: loading runs the library's initializers. The library is
    // trusted to be a phonebook provider.
    let library = unsafe { Library::new(&path) }.map_err(|source| NativeError::Load {
        path: path.clone(),
        source,
    })?;
    let library = Arc::new(library);

    let mut builder = Provider::builder(name);
    let mut exported = 0usize;

    if let Some(add) = symbol::<RawAddHandler>(&library, &names.add, &path)? {
        let lib = Arc::clone(&library);
        builder = builder.handler(
            names.add.as_str(),
            Handler::Add(Arc::new(move |record: &FixedRecord| {
                let _lib = &lib;
                // The handler may scribble on its argument; give it a copy.
                let mut copy = *record;
                // Safety: the symbol was resolved with this exact signature
                // and `copy` outlives the call.
                unsafe { add(&mut copy) as i64 }
            })),
        );
        exported += 1;
    }

    if let Some(get) = symbol::<RawGetHandler>(&library, &names.get, &path)? {
        let lib = Arc::clone(&library);
        builder = builder.handler(
            names.get.as_str(),
            Handler::Get(Arc::new(move |key: &[u8], out: &mut FixedRecord| {
                let _lib = &lib;
                // Safety: `key` and `out` are valid for the duration of the
                // call; keys are staged from a u32 length.
                unsafe { get(key.as_ptr().cast(), key.len() as c_uint, out) as i64 }
            })),
        );
        exported += 1;
    }

    if let Some(delete) = symbol::<RawDeleteHandler>(&library, &names.delete, &path)? {
        let lib = Arc::clone(&library);
        builder = builder.handler(
            names.delete.as_str(),
            Handler::Delete(Arc::new(move |key: &[u8]| {
                let _lib = &lib;
                // Safety: as above.
                unsafe { delete(key.as_ptr().cast(), key.len() as c_uint) as i64 }
            })),
        );
        exported += 1;
    }

    if exported == 0 {
        return Err(NativeError::NoHandlers { path });
    }
    debug!(provider = name, path = %path.display(), exported, "native provider loaded");
    Ok(builder.build())
}

/// Resolve `name` as a function pointer of type `T`, or `None` if absent.
fn symbol<T: Copy>(library: &Library, name: &str, path: &Path) -> Result<Option<T>, NativeError> {
    let c_name =
        CString::new(name).map_err(|_| NativeError::InvalidSymbol(name.to_string()))?;

    // Safety: `T` is one of the raw handler signatures above; the provider
    // contract fixes the signature for each exported name.
    match unsafe { library.get::<T>(c_name.as_bytes_with_nul()) } {
        Ok(symbol) => Ok(Some(*symbol)),
        Err(err) => {
            warn!(symbol = name, path = %path.display(), error = %err, "handler not exported");
            Ok(None)
        }
    }
}
