//! `GetProcAddress` replacement and the substitute graphics factory.
//!
//! Resolving the graphics factory symbol by name yields the substitute
//! factory; everything else, including lookups by ordinal, is resolved by the
//! real function.

use std::ffi::{c_char, c_void, CStr};

use tracing::{error, trace};

use crate::error::Result;
use crate::interceptor::Interceptor;

/// `E_FAIL`, returned to the legacy application when no backend can be built.
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// What a `GetProcAddress` caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcName<'a> {
    Name(&'a CStr),
    Ordinal(u16),
}

impl<'a> ProcName<'a> {
    /// Decode the `lpProcName` argument. Values that fit in the low word are
    /// ordinals, not pointers.
    ///
    /// # Safety
    ///
    /// If `name` is above `0xFFFF` it must point to a nul-terminated string
    /// valid for `'a`.
    pub unsafe fn from_ptr(name: *const c_char) -> Self {
        if (name as usize) <= 0xFFFF {
            ProcName::Ordinal(name as usize as u16)
        } else {
            ProcName::Name(CStr::from_ptr(name))
        }
    }

    /// Exact, case-sensitive match against a symbol name.
    pub fn is(&self, symbol: &str) -> bool {
        match self {
            ProcName::Name(name) => name.to_bytes() == symbol.as_bytes(),
            ProcName::Ordinal(_) => false,
        }
    }
}

impl Interceptor {
    /// Answer a `GetProcAddress` call from the legacy application.
    ///
    /// # Safety
    ///
    /// Same contract as `GetProcAddress`.
    pub unsafe fn proc_address(&self, module: isize, name: *const c_char) -> *const c_void {
        let proc_name = ProcName::from_ptr(name);

        if proc_name.is(&self.config.graphics_factory_symbol) {
            trace!("Injecting custom {}", self.config.graphics_factory_symbol);
            return self.replacements.graphics_factory as *const c_void;
        }

        (self.hooks.proc_address.original())(module, name)
    }

    /// Body of the substitute graphics factory: build and register the
    /// backend, and hand its interface pointer to the caller.
    ///
    /// Registration errors are returned; backend creation failures are
    /// reported to the caller as `E_FAIL`.
    ///
    /// # Safety
    ///
    /// `out` must be null or valid for a pointer write.
    pub unsafe fn create_graphics_backend(&self, out: *mut *mut c_void) -> Result<i32> {
        if !out.is_null() {
            *out = std::ptr::null_mut();
        }

        let backend = match self.create_backend() {
            Ok(backend) => backend,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Couldn't create graphics backend: {e}");
                return Ok(E_FAIL);
            },
        };

        if !out.is_null() {
            *out = backend.as_raw();
        }

        Ok(0)
    }
}
