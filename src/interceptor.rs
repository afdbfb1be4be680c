//! State shared between the control thread and the hooked application.
//!
//! [`Interceptor`] holds everything the replacements need: the hook table, the
//! intercepted window, the captured window procedure, the shader sources and
//! the registered graphics backend. The write-once fields are `OnceCell`s;
//! after they are set they are only read, from whichever thread the legacy
//! application calls in on.
//!
//! `extern "system"` replacements can't capture anything, so they find their
//! interceptor through a small registry keyed by the base address of the
//! patched image, or by window handle for the chained window procedure.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::backend::{BackendFactory, GraphicsBackend, ShaderSources};
use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::hooks::{HookTable, Replacements};
use crate::system::{Hwnd, WindowSystem, WndProc};

static IMAGES: Lazy<RwLock<HashMap<usize, Weak<Interceptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static WINDOWS: Lazy<RwLock<HashMap<isize, Weak<Interceptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// The hooking state of one patched image.
pub struct Interceptor {
    pub(crate) config: ForgeConfig,
    pub(crate) hooks: HookTable,
    pub(crate) replacements: Replacements,
    pub(crate) system: Arc<dyn WindowSystem>,
    pub(crate) window: OnceCell<Hwnd>,
    pub(crate) original_wndproc: OnceCell<Option<WndProc>>,
    pub(crate) shaders: Mutex<ShaderSources>,
    pub(crate) backend: OnceCell<Arc<dyn GraphicsBackend>>,
    pub(crate) backend_factory: Option<Box<dyn BackendFactory>>,
    image: usize,
}

impl Interceptor {
    /// Build an interceptor and register it for its image.
    ///
    /// Fails with [`ForgeError::AlreadyActive`] if a live interceptor already
    /// owns the image.
    pub(crate) fn register(
        config: ForgeConfig,
        hooks: HookTable,
        replacements: Replacements,
        system: Arc<dyn WindowSystem>,
        backend_factory: Option<Box<dyn BackendFactory>>,
    ) -> Result<Arc<Self>> {
        let image = hooks.image();
        let mut images = IMAGES.write();

        if images.get(&image).and_then(Weak::upgrade).is_some() {
            return Err(ForgeError::AlreadyActive(image));
        }

        let interceptor = Arc::new(Interceptor {
            config,
            hooks,
            replacements,
            system,
            window: OnceCell::new(),
            original_wndproc: OnceCell::new(),
            shaders: Mutex::new(ShaderSources::default()),
            backend: OnceCell::new(),
            backend_factory,
            image,
        });

        images.insert(image, Arc::downgrade(&interceptor));
        debug!("Registered interceptor for image {image:#x}");

        Ok(interceptor)
    }

    /// The interceptor registered for the image at `image`.
    pub fn for_image(image: usize) -> Option<Arc<Interceptor>> {
        IMAGES.read().get(&image).and_then(Weak::upgrade)
    }

    /// The interceptor that owns the window `hwnd`.
    pub fn for_window(hwnd: Hwnd) -> Option<Arc<Interceptor>> {
        WINDOWS.read().get(&hwnd.0).and_then(Weak::upgrade)
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// Base address of the patched image.
    pub fn image(&self) -> usize {
        self.image
    }

    /// The intercepted game window, once created.
    pub fn window(&self) -> Option<Hwnd> {
        self.window.get().copied()
    }

    /// The window procedure that was installed before ours.
    pub fn original_window_proc(&self) -> Option<WndProc> {
        self.original_wndproc.get().copied().flatten()
    }

    /// Record the game window. It can be recorded only once.
    ///
    /// Holds the shader lock, so a concurrent [`Interceptor::set_shader`] either
    /// lands before the window exists or fails with `ShadersFrozen`.
    pub(crate) fn record_window(self: &Arc<Self>, hwnd: Hwnd) -> Result<()> {
        let _shaders = self.shaders.lock();
        self.window.set(hwnd).map_err(|_| ForgeError::WindowAlreadyIntercepted)?;
        WINDOWS.write().insert(hwnd.0, Arc::downgrade(self));
        Ok(())
    }

    pub(crate) fn unregister(&self) {
        if let Some(hwnd) = self.window() {
            WINDOWS.write().remove(&hwnd.0);
        }

        let mut images = IMAGES.write();
        if images.get(&self.image).map_or(false, |weak| ptr_eq(weak, self)) {
            images.remove(&self.image);
        }
        debug!("Unregistered interceptor for image {:#x}", self.image);
    }
}

fn ptr_eq(weak: &Weak<Interceptor>, interceptor: &Interceptor) -> bool {
    std::ptr::eq(weak.as_ptr(), interceptor)
}
