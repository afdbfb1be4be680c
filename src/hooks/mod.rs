//! The import hooks installed into the legacy application.
//!
//! - [`window`]: `CreateWindowExA`, plus the chained window procedure.
//! - [`metrics`]: `GetSystemMetrics`.
//! - [`proc_address`]: `GetProcAddress`, plus the substitute graphics factory.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::Result;
use crate::hook::{Hook, ImportHook, ImportPatcher, ImportTarget};
use crate::system::{
    CreateWindowExAFn, GetProcAddressFn, GetSystemMetricsFn, GraphicsFactoryFn, WndProc,
};

pub mod metrics;
pub mod proc_address;
pub mod window;

pub const USER32: &str = "user32.dll";
pub const KERNEL32: &str = "kernel32.dll";

/// Addresses the hooks install, one per hooked import, plus the chained
/// window procedure and the substitute graphics factory.
///
/// On Windows, [`Replacements::win32`] provides the crate's own
/// `extern "system"` trampolines.
#[derive(Clone, Copy)]
pub struct Replacements {
    pub create_window: CreateWindowExAFn,
    pub system_metrics: GetSystemMetricsFn,
    pub proc_address: GetProcAddressFn,
    pub window_proc: WndProc,
    pub graphics_factory: GraphicsFactoryFn,
}

/// The fixed set of imports managed as a unit.
#[derive(Debug)]
pub struct HookTable {
    pub create_window: ImportHook<CreateWindowExAFn>,
    pub system_metrics: ImportHook<GetSystemMetricsFn>,
    pub proc_address: ImportHook<GetProcAddressFn>,
    image: usize,
}

impl HookTable {
    /// Resolve every managed import in the patcher's image.
    pub fn new(patcher: Arc<dyn ImportPatcher>, replacements: &Replacements) -> Result<Self> {
        let image = patcher.image();

        Ok(Self {
            create_window: ImportHook::new(
                Arc::clone(&patcher),
                ImportTarget::new(USER32, "CreateWindowExA"),
                replacements.create_window,
            )?,
            system_metrics: ImportHook::new(
                Arc::clone(&patcher),
                ImportTarget::new(USER32, "GetSystemMetrics"),
                replacements.system_metrics,
            )?,
            proc_address: ImportHook::new(
                patcher,
                ImportTarget::new(KERNEL32, "GetProcAddress"),
                replacements.proc_address,
            )?,
            image,
        })
    }

    pub fn image(&self) -> usize {
        self.image
    }

    /// All the hooks, in injection order.
    pub fn hooks(&self) -> [&dyn Hook; 3] {
        [&self.create_window, &self.system_metrics, &self.proc_address]
    }

    /// Whether every hook is currently injected.
    pub fn is_active(&self) -> bool {
        self.hooks().iter().all(|hook| hook.is_active())
    }

    /// Inject every hook. Returns `true` only if all of them succeeded.
    ///
    /// Hooks that were patched stay patched even if others fail.
    pub fn inject(&self) -> bool {
        let ok = self.apply("inject", |hook| hook.inject());
        info!("Inject: {}", if ok { "ok" } else { "failed" });
        ok
    }

    /// Restore every hook. Returns `true` only if all of them succeeded.
    pub fn restore(&self) -> bool {
        let ok = self.apply("restore", |hook| hook.restore());
        info!("Restore: {}", if ok { "ok" } else { "failed" });
        ok
    }

    fn apply(&self, action: &str, f: impl Fn(&dyn Hook) -> Result<()>) -> bool {
        self.hooks().into_iter().fold(true, |ok, hook| match f(hook) {
            Ok(()) => ok,
            Err(e) => {
                error!("Couldn't {action} {}: {e}", hook.target());
                false
            },
        })
    }
}
