//! # forgehook
//!
//! This library makes a legacy, fullscreen, fixed-resolution game run in a
//! normal window on a substitute graphics backend, without touching its binary
//! on disk. It does so by patching the resolved import address table entries
//! of the game's image:
//!
//! - `CreateWindowExA` rewrites the game window into a centered, captioned
//!   640x480 window and chains its window procedure;
//! - `GetSystemMetrics` reports the legacy resolution as the screen size;
//! - `GetProcAddress` hands out a substitute for `DirectDrawCreate`, which
//!   builds and registers the substitute [`GraphicsBackend`].
//!
//! Once the game window exists, the window's message pump runs on a dedicated
//! UI thread and can be stopped at will from the control thread.
//!
//! ## Fair warning
//!
//! [`forgehook`](crate) rewrites live import tables and re-enters foreign code
//! through `extern "system"` trampolines. It contains a hefty amount of FFI and
//! `unsafe` code. Misuse of the control API (a second hooking context, a second
//! game window, a second backend) is treated as an invariant violation: the
//! control API returns the error, and the trampolines abort the process.
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> forgehook::Result<()> {
//! use std::time::Duration;
//!
//! use forgehook::Forge;
//!
//! let forge = Forge::for_current_process()?.build()?;
//! forge.set_vertex_shader("/* vertex */")?;
//! forge.set_fragment_shader("/* fragment */")?;
//!
//! if !forge.inject_or_rollback() {
//!     return Ok(());
//! }
//!
//! // ... let the game create its window ...
//!
//! forge.run(|quit| println!("Message pump ended, quit = {quit}"))?;
//! forge.stop()?;
//! forge.wait_for_completion(Duration::from_secs(1));
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```
#![allow(clippy::missing_safety_doc)]

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

pub mod backend;
pub mod config;
pub mod error;
pub mod hook;
pub mod hooks;
pub mod iat;
pub mod interceptor;
pub mod pump;
pub mod system;
#[cfg(windows)]
pub mod win32;

pub use backend::{BackendFactory, BackendResult, GraphicsBackend, ShaderSources, ShaderStage};
pub use config::ForgeConfig;
pub use error::{ForgeError, Result};
pub use hook::{Hook, ImportPatcher, ImportTarget};
pub use hooks::{HookTable, Replacements};
pub use interceptor::Interceptor;
pub use pump::MessageLoop;
pub use system::{Hwnd, WindowSystem};
pub use tracing;

/// The hooking context, owned by the control thread.
///
/// There is at most one live `Forge` per patched image. Dropping it restores
/// every injected hook and unregisters the context; the backend reference is
/// released once the last in-flight call into the interceptor returns.
pub struct Forge {
    interceptor: Arc<Interceptor>,
    message_loop: MessageLoop,
}

impl Forge {
    /// Create a builder object.
    pub fn builder(
        patcher: Arc<dyn ImportPatcher>,
        system: Arc<dyn WindowSystem>,
        replacements: Replacements,
    ) -> ForgeBuilder {
        ForgeBuilder {
            patcher,
            system,
            replacements,
            config: ForgeConfig::default(),
            backend_factory: None,
        }
    }

    /// Inject every hook. Returns `true` only if all of them succeeded; hooks
    /// that were patched stay patched on partial failure.
    pub fn inject(&self) -> bool {
        self.interceptor.hooks.inject()
    }

    /// Restore every hook. Returns `true` only if all of them succeeded.
    pub fn restore(&self) -> bool {
        self.interceptor.hooks.restore()
    }

    /// Inject every hook, or none: if any hook fails, the ones already patched
    /// are restored.
    pub fn inject_or_rollback(&self) -> bool {
        if self.inject() {
            return true;
        }

        if !self.restore() {
            error!("Rollback after a failed inject left hooks behind");
        }

        false
    }

    /// Whether every hook is currently injected.
    pub fn is_active(&self) -> bool {
        self.interceptor.hooks.is_active()
    }

    pub fn set_vertex_shader(&self, source: impl Into<String>) -> Result<()> {
        self.interceptor.set_shader(ShaderStage::Vertex, source)
    }

    pub fn set_fragment_shader(&self, source: impl Into<String>) -> Result<()> {
        self.interceptor.set_shader(ShaderStage::Fragment, source)
    }

    /// Register an externally built graphics backend. See
    /// [`Interceptor::register_backend`].
    pub fn register_backend(&self, backend: Arc<dyn GraphicsBackend>) -> Result<()> {
        self.interceptor.register_backend(backend)
    }

    /// Start the message pump of the game window on the UI thread.
    ///
    /// `on_complete` runs at most once, on this thread, from
    /// [`Forge::dispatch_completions`], [`Forge::wait_for_completion`] or the
    /// drop of this context. It never runs if the context is dropped while
    /// the pump is still running.
    pub fn run(&self, on_complete: impl FnOnce(bool) + 'static) -> Result<()> {
        self.message_loop.run(&self.interceptor, on_complete)
    }

    /// Post the end-of-pump sentinel to the game window.
    pub fn stop(&self) -> Result<()> {
        self.message_loop.stop(&self.interceptor)
    }

    /// Queue work on the UI thread, in order with the message pump.
    ///
    /// Win32 message queues are per thread: the legacy application must create
    /// its window on this thread for the pump to see its messages.
    pub fn queue_ui_work(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.message_loop.queue(work)
    }

    /// Run the callbacks of every finished pump. Never blocks.
    pub fn dispatch_completions(&self) -> usize {
        self.message_loop.dispatch_completions()
    }

    /// Block up to `timeout` for a pump to finish, then run every available
    /// callback.
    pub fn wait_for_completion(&self, timeout: Duration) -> usize {
        self.message_loop.wait_for_completion(timeout)
    }

    /// Number of pumps whose callback hasn't run yet.
    pub fn pending_completions(&self) -> usize {
        self.message_loop.pending()
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// The intercepted game window, once created.
    pub fn window(&self) -> Option<Hwnd> {
        self.interceptor.window()
    }
}

impl Drop for Forge {
    fn drop(&mut self) {
        if self.interceptor.hooks.hooks().iter().any(|hook| hook.is_active()) && !self.restore() {
            error!("Couldn't restore every hook while dropping the hooking context");
        }

        self.interceptor.restore_window_proc();
        self.interceptor.unregister();
        info!("Hooking context for image {:#x} destroyed", self.interceptor.image());
    }
}

/// Builder object for [`Forge`].
pub struct ForgeBuilder {
    patcher: Arc<dyn ImportPatcher>,
    system: Arc<dyn WindowSystem>,
    replacements: Replacements,
    config: ForgeConfig,
    backend_factory: Option<Box<dyn BackendFactory>>,
}

impl ForgeBuilder {
    pub fn with_config(mut self, config: ForgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Factory invoked when the legacy application calls the redirected
    /// graphics factory.
    pub fn with_backend_factory(mut self, factory: impl BackendFactory + 'static) -> Self {
        self.backend_factory = Some(Box::new(factory));
        self
    }

    /// Resolve every hooked import, register the context and start the UI
    /// thread. No hook is injected yet.
    pub fn build(self) -> Result<Forge> {
        let hooks = HookTable::new(self.patcher, &self.replacements)?;
        let message_loop = MessageLoop::new(&self.config.ui_thread_name)?;
        let interceptor = Interceptor::register(
            self.config,
            hooks,
            self.replacements,
            self.system,
            self.backend_factory,
        )?;

        info!("Hooking context created for image {:#x}", interceptor.image());

        Ok(Forge { interceptor, message_loop })
    }
}
