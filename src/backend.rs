//! Contract with the substitute graphics backend.
//!
//! The backend itself lives outside this crate. When the legacy application
//! calls the redirected graphics factory, a [`BackendFactory`] builds the
//! backend, and the interceptor registers it exactly once, pushing the
//! configured shader sources into it.

use std::error::Error;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::interceptor::Interceptor;

/// The substitute graphics backend.
///
/// Shared between the interceptor and whoever created it; the interceptor
/// drops its reference when the hooking context is destroyed.
pub trait GraphicsBackend: Send + Sync {
    fn set_vertex_shader(&self, source: &str);
    fn set_fragment_shader(&self, source: &str);

    /// Interface pointer handed back to the legacy application in place of
    /// the vendor object.
    fn as_raw(&self) -> *mut c_void;
}

/// What a [`BackendFactory`] produces.
pub type BackendResult =
    std::result::Result<Arc<dyn GraphicsBackend>, Box<dyn Error + Send + Sync>>;

/// Builds the [`GraphicsBackend`] when the legacy application asks for one.
pub trait BackendFactory: Send + Sync {
    fn create(&self) -> BackendResult;
}

impl<F> BackendFactory for F
where
    F: Fn() -> BackendResult + Send + Sync,
{
    fn create(&self) -> BackendResult {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Shader source text configured by the control layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
}

impl ShaderSources {
    pub fn get(&self, stage: ShaderStage) -> Option<&str> {
        match stage {
            ShaderStage::Vertex => self.vertex.as_deref(),
            ShaderStage::Fragment => self.fragment.as_deref(),
        }
    }

    fn slot_mut(&mut self, stage: ShaderStage) -> &mut Option<String> {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
        }
    }
}

impl Interceptor {
    /// Replace the source of a shader stage. Only allowed before the game
    /// window is created.
    pub fn set_shader(&self, stage: ShaderStage, source: impl Into<String>) -> Result<()> {
        let mut shaders = self.shaders.lock();

        if self.window().is_some() {
            return Err(ForgeError::ShadersFrozen);
        }

        *shaders.slot_mut(stage) = Some(source.into());
        debug!("Configured {stage} shader");

        Ok(())
    }

    pub fn shaders(&self) -> ShaderSources {
        self.shaders.lock().clone()
    }

    /// Register the graphics backend and configure it with both shaders.
    ///
    /// Fails if a backend is already registered, or if either shader source is
    /// missing. The backend is configured without holding the shader lock, so
    /// it may read the sources back.
    pub fn register_backend(&self, backend: Arc<dyn GraphicsBackend>) -> Result<()> {
        if self.backend.get().is_some() {
            return Err(ForgeError::BackendAlreadyRegistered);
        }

        let (vertex, fragment) = {
            let shaders = self.shaders.lock();
            let missing = ForgeError::ShaderMissing;
            let vertex = shaders.vertex.clone().ok_or(missing(ShaderStage::Vertex))?;
            let fragment = shaders.fragment.clone().ok_or(missing(ShaderStage::Fragment))?;
            (vertex, fragment)
        };

        backend.set_vertex_shader(&vertex);
        backend.set_fragment_shader(&fragment);

        self.backend.set(backend).map_err(|_| ForgeError::BackendAlreadyRegistered)?;
        info!("Graphics backend registered");

        Ok(())
    }

    /// The registered graphics backend.
    pub fn backend(&self) -> Option<&Arc<dyn GraphicsBackend>> {
        self.backend.get()
    }

    /// Build a backend with the configured factory and register it.
    pub(crate) fn create_backend(&self) -> Result<Arc<dyn GraphicsBackend>> {
        let factory = self.backend_factory.as_ref().ok_or(ForgeError::NoBackendFactory)?;
        let backend = factory.create().map_err(|e| ForgeError::BackendCreation(e.to_string()))?;

        self.register_backend(Arc::clone(&backend))?;

        Ok(backend)
    }
}
