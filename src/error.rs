//! Error type shared by every [`forgehook`](crate) operation.

use thiserror::Error;
use tracing::error;

use crate::backend::ShaderStage;

/// Errors raised while hooking the legacy application.
///
/// Errors come in two tiers. Fatal errors (see [`ForgeError::is_fatal`]) are
/// misuses of the control API or invariant violations and should terminate
/// the process; the remaining errors are operational failures the caller may
/// retry or tolerate.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Another hooking context already owns the image.
    #[error("a hooking context is already active for image {0:#x}")]
    AlreadyActive(usize),

    /// The target image headers could not be parsed.
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),

    /// The target image doesn't import the requested symbol.
    #[error("{module}!{symbol} is not imported by the target image")]
    ImportNotFound {
        /// Imported module name.
        module: String,
        /// Imported symbol name.
        symbol: String,
    },

    /// The import slot was found but the loader never filled it in.
    #[error("{module}!{symbol} has not been resolved by the loader")]
    ImportUnresolved {
        /// Imported module name.
        module: String,
        /// Imported symbol name.
        symbol: String,
    },

    /// Changing the protection of an import slot failed.
    #[error("couldn't change protection of import slot {addr:#x}: {reason}")]
    Protect {
        /// Address of the import slot.
        addr: usize,
        /// Platform error message.
        reason: String,
    },

    /// The patching mechanism refused to write an import slot.
    #[error("patching import slot {0:#x} was rejected")]
    PatchRejected(usize),

    /// A second game window was about to be intercepted.
    #[error("the game window has already been intercepted")]
    WindowAlreadyIntercepted,

    /// An operation requiring the game window ran before it was created.
    #[error("the game window has not been created yet")]
    NoWindow,

    /// Shader sources were changed after the game window was created.
    #[error("shader sources can't change once the game window exists")]
    ShadersFrozen,

    /// The graphics backend was registered before a shader was configured.
    #[error("the {0} shader source was never configured")]
    ShaderMissing(ShaderStage),

    /// The graphics backend was registered twice.
    #[error("a graphics backend is already registered")]
    BackendAlreadyRegistered,

    /// The legacy application asked for a graphics backend but there is no
    /// factory to build one.
    #[error("no graphics backend factory is configured")]
    NoBackendFactory,

    /// The backend factory failed.
    #[error("graphics backend creation failed: {0}")]
    BackendCreation(String),

    /// A message couldn't be posted to the game window.
    #[error("couldn't post message {message:#06x}: {reason}")]
    PostMessage {
        /// Message identifier.
        message: u32,
        /// Platform error message.
        reason: String,
    },

    /// The message pump thread couldn't be started or has gone away.
    #[error("ui thread: {0}")]
    UiThread(String),
}

impl ForgeError {
    /// Whether the error is a precondition violation rather than a
    /// recoverable runtime failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForgeError::AlreadyActive(_)
                | ForgeError::InvalidImage(_)
                | ForgeError::ImportNotFound { .. }
                | ForgeError::ImportUnresolved { .. }
                | ForgeError::WindowAlreadyIntercepted
                | ForgeError::NoWindow
                | ForgeError::ShadersFrozen
                | ForgeError::ShaderMissing(_)
                | ForgeError::BackendAlreadyRegistered
        )
    }
}

/// Result alias for [`ForgeError`].
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Log the error and abort the process.
///
/// Used from `extern "system"` replacements, which have no way of handing an
/// error back to the legacy caller.
pub(crate) fn abort_with(err: &ForgeError) -> ! {
    error!("Fatal: {err}");
    std::process::abort()
}
