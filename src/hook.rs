//! Single import-table hooks.
//!
//! An [`ImportHook`] owns one resolved import slot of the target image. It
//! remembers the address the loader put there so replacements can forward to
//! it, and can swap the replacement in and out on demand. The actual memory
//! write is delegated to an [`ImportPatcher`], which keeps the policy code
//! independent of how (and where) slots get patched.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ForgeError, Result};
use crate::system::{
    CreateWindowExAFn, GetProcAddressFn, GetSystemMetricsFn, GraphicsFactoryFn, WndProc,
};

/// Module and symbol name of an imported function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportTarget {
    pub module: String,
    pub symbol: String,
}

impl ImportTarget {
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        ImportTarget { module: module.into(), symbol: symbol.into() }
    }
}

impl fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.symbol)
    }
}

/// Address of a pointer-sized import address table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImportSlot(usize);

impl ImportSlot {
    /// # Safety
    ///
    /// `cell` must be a pointer-aligned, pointer-sized location that stays
    /// valid for as long as the slot is used.
    pub unsafe fn from_ptr(cell: *mut usize) -> Self {
        ImportSlot(cell as usize)
    }

    pub fn addr(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut usize {
        self.0 as *mut usize
    }

    /// Atomically read the slot.
    ///
    /// # Safety
    ///
    /// The slot must still be valid and readable.
    pub unsafe fn load(self) -> usize {
        AtomicUsize::from_ptr(self.as_ptr()).load(Ordering::SeqCst)
    }

    /// Atomically exchange the slot contents, returning the previous value.
    ///
    /// # Safety
    ///
    /// The slot must still be valid and currently writable.
    pub unsafe fn swap(self, value: usize) -> usize {
        AtomicUsize::from_ptr(self.as_ptr()).swap(value, Ordering::SeqCst)
    }
}

/// The mechanism that finds and rewrites import slots.
///
/// [`ImageImportPatcher`](crate::iat::ImageImportPatcher) walks a loaded PE
/// image; other implementations can stand in for it.
pub trait ImportPatcher: Send + Sync {
    /// Base address of the patched image. Hooking contexts are keyed by it.
    fn image(&self) -> usize;

    /// Find the slot through which the image calls `target`.
    fn locate(&self, target: &ImportTarget) -> Result<ImportSlot>;

    /// Write `value` into `slot`, returning the previous contents.
    ///
    /// # Safety
    ///
    /// `slot` must come from [`ImportPatcher::locate`] on the same patcher and
    /// `value` must be a function compatible with the imported one.
    unsafe fn swap(&self, slot: ImportSlot, value: usize) -> Result<usize>;
}

/// Function pointer types that can live in an import slot.
///
/// # Safety
///
/// Implementors must be plain, pointer-sized function pointers.
pub unsafe trait HookFn: Copy + Send + Sync + 'static {
    fn addr(self) -> usize;

    /// # Safety
    ///
    /// `addr` must be the non-null address of a function with this signature.
    unsafe fn from_addr(addr: usize) -> Self;
}

macro_rules! impl_hook_fn {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl HookFn for $t {
                fn addr(self) -> usize {
                    self as usize
                }

                unsafe fn from_addr(addr: usize) -> Self {
                    std::mem::transmute::<usize, $t>(addr)
                }
            }
        )*
    };
}

impl_hook_fn!(CreateWindowExAFn, GetSystemMetricsFn, GetProcAddressFn, WndProc, GraphicsFactoryFn);

/// Type-erased view of an [`ImportHook`], so tables can drive heterogeneous
/// hooks uniformly.
pub trait Hook: Send + Sync {
    fn target(&self) -> &ImportTarget;
    fn is_active(&self) -> bool;
    fn inject(&self) -> Result<()>;
    fn restore(&self) -> Result<()>;
}

/// One patched import.
///
/// Resolution happens eagerly in [`ImportHook::new`]; the hook starts out
/// inactive. [`ImportHook::inject`] and [`ImportHook::restore`] are no-ops
/// when the hook is already in the requested state.
pub struct ImportHook<F: HookFn> {
    target: ImportTarget,
    slot: ImportSlot,
    original: usize,
    replacement: usize,
    active: AtomicBool,
    patcher: Arc<dyn ImportPatcher>,
    _fn: PhantomData<F>,
}

impl<F: HookFn> ImportHook<F> {
    /// Locate `target` in the image and record its current address as the
    /// original.
    pub fn new(
        patcher: Arc<dyn ImportPatcher>,
        target: ImportTarget,
        replacement: F,
    ) -> Result<Self> {
        let slot = patcher.locate(&target)?;
        let original = unsafe { slot.load() };

        if original == 0 {
            return Err(ForgeError::ImportUnresolved {
                module: target.module.clone(),
                symbol: target.symbol.clone(),
            });
        }

        trace!("Resolved {target} at slot {:#x} -> {original:#x}", slot.addr());

        Ok(Self {
            target,
            slot,
            original,
            replacement: replacement.addr(),
            active: AtomicBool::new(false),
            patcher,
            _fn: PhantomData,
        })
    }

    /// The pre-hook entry point, for forwarding.
    pub fn original(&self) -> F {
        // SAFETY: `original` was checked to be non-null at construction and
        // came from a slot the loader filled with a function of type `F`.
        unsafe { F::from_addr(self.original) }
    }

    pub fn slot(&self) -> ImportSlot {
        self.slot
    }
}

impl<F: HookFn> Hook for ImportHook<F> {
    fn target(&self) -> &ImportTarget {
        &self.target
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn inject(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        unsafe { self.patcher.swap(self.slot, self.replacement)? };
        self.active.store(true, Ordering::SeqCst);
        debug!("Injected {}", self.target);

        Ok(())
    }

    fn restore(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        unsafe { self.patcher.swap(self.slot, self.original)? };
        self.active.store(false, Ordering::SeqCst);
        debug!("Restored {}", self.target);

        Ok(())
    }
}

impl<F: HookFn> fmt::Debug for ImportHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportHook")
            .field("target", &self.target)
            .field("slot", &format_args!("{:#x}", self.slot.addr()))
            .field("original", &format_args!("{:#x}", self.original))
            .field("replacement", &format_args!("{:#x}", self.replacement))
            .field("active", &self.is_active())
            .finish()
    }
}
