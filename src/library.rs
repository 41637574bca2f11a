//! Symbol lookup - dynamic libraries and in-process symbol tables
//!
//! Platform-agnostic wrapper around dlopen/LoadLibrary, plus a table of
//! explicitly registered addresses for code linked into the process.

use crate::error::{BindError, Result};
use core::ffi::c_void;
use core::ptr::NonNull;
use dashmap::DashMap;
use std::ffi::CString;
use std::sync::Arc;

/// Resolves symbol names to addresses
pub trait SymbolLookup: Send + Sync {
    fn find(&self, name: &str) -> Option<usize>;

    /// `find`, failing with `SymbolNotFound`
    fn lookup(&self, name: &str) -> Result<usize> {
        self.find(name)
            .ok_or_else(|| BindError::SymbolNotFound(name.to_string()))
    }
}

impl<T: SymbolLookup + ?Sized> SymbolLookup for Arc<T> {
    fn find(&self, name: &str) -> Option<usize> {
        (**self).find(name)
    }
}

/// Handle to dynamically loaded library
pub struct Library {
    name: String,
    handle: NonNull<c_void>,
    /// The process image is never closed
    owned: bool,
}

impl Library {
    /// Load library by name or path
    ///
    /// Searches standard library paths when `name` has no directory part.
    pub fn load(name: &str) -> Result<Self> {
        let handle = Self::load_impl(name)?;
        Ok(Self {
            name: name.to_string(),
            handle,
            owned: true,
        })
    }

    /// Symbols of the running process and the libraries it already loaded
    pub fn open_self() -> Result<Self> {
        let handle = Self::open_self_impl()?;
        Ok(Self {
            name: "<self>".to_string(),
            handle,
            owned: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(unix)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>> {
        let cname = CString::new(name)
            .map_err(|_| BindError::SymbolNotFound(format!("invalid library name {:?}", name)))?;
        // SAFETY: cname is NUL-terminated and outlives the call
        let handle = unsafe { libc::dlopen(cname.as_ptr(), libc::RTLD_NOW) };
        NonNull::new(handle).ok_or_else(|| BindError::SymbolNotFound(format!("{}: {}", name, dl_error())))
    }

    #[cfg(unix)]
    fn open_self_impl() -> Result<NonNull<c_void>> {
        // SAFETY: a null filename asks for the main program handle
        let handle = unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        NonNull::new(handle).ok_or_else(|| BindError::SymbolNotFound(format!("<self>: {}", dl_error())))
    }

    #[cfg(windows)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryW;

        let wide: Vec<u16> = OsStr::new(name).encode_wide().chain(Some(0)).collect();
        // SAFETY: wide is NUL-terminated and outlives the call
        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle as *mut c_void).ok_or_else(|| {
                BindError::SymbolNotFound(format!("{}: error code {}", name, GetLastError()))
            })
        }
    }

    #[cfg(windows)]
    fn open_self_impl() -> Result<NonNull<c_void>> {
        use winapi::um::libloaderapi::GetModuleHandleW;

        // SAFETY: a null name returns the handle of the executable
        let handle = unsafe { GetModuleHandleW(std::ptr::null()) };
        NonNull::new(handle as *mut c_void)
            .ok_or_else(|| BindError::SymbolNotFound("<self>".to_string()))
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        // SAFETY: handle came from dlopen and is still open
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        use winapi::um::libloaderapi::GetProcAddress;

        // SAFETY: handle came from LoadLibraryW and is still loaded
        unsafe { GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *mut c_void }
    }
}

impl SymbolLookup for Library {
    fn find(&self, name: &str) -> Option<usize> {
        let cname = CString::new(name).ok()?;
        let ptr = self.symbol_impl(&cname);
        (!ptr.is_null()).then_some(ptr as usize)
    }
}

#[cfg(unix)]
fn dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated message
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "Unknown error".into()
        } else {
            std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: handle came from dlopen and is closed exactly once
            unsafe {
                libc::dlclose(self.handle.as_ptr());
            }
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        use winapi::um::libloaderapi::FreeLibrary;
        if self.owned {
            // SAFETY: handle came from LoadLibraryW and is freed exactly once
            unsafe {
                FreeLibrary(self.handle.as_ptr() as _);
            }
        }
    }
}

// SAFETY: dlopen/LoadLibrary handles may be used from any thread
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("name", &self.name).finish()
    }
}

/// Explicitly registered symbols
///
/// Lets functions linked into the process (for instance Rust `extern "C"`
/// functions) be bound without going through the dynamic loader.
#[derive(Default)]
pub struct SymbolTable {
    symbols: DashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, address: usize) {
        self.symbols.insert(name.to_string(), address);
    }

    /// Builder form of `insert`
    pub fn with(self, name: &str, address: usize) -> Self {
        self.insert(name, address);
        self
    }

    pub fn remove(&self, name: &str) -> Option<usize> {
        self.symbols.remove(name).map(|(_, address)| address)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolLookup for SymbolTable {
    fn find(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).map(|entry| *entry)
    }
}
