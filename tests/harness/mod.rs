#![allow(dead_code)]

pub mod image;
pub mod legacy;

use std::ffi::c_void;
use std::sync::Arc;

use forgehook::{Forge, ForgeBuilder, GraphicsBackend, WindowSystem};
use parking_lot::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use self::image::TestImage;
use self::system::MockSystem;

pub fn setup_tracing() {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_test_writer(),
        )
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Builder for a hooking context over `image`, using the test replacements.
pub fn forge(image: &TestImage, system: &Arc<MockSystem>) -> ForgeBuilder {
    setup_tracing();
    legacy::enter(image);

    let system: Arc<dyn WindowSystem> = system.clone();
    Forge::builder(image.patcher(), system, legacy::replacements())
}

/// Graphics backend recording the shader sources pushed into it.
#[derive(Default)]
pub struct RecordingBackend {
    pub vertex: Mutex<Option<String>>,
    pub fragment: Mutex<Option<String>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl GraphicsBackend for RecordingBackend {
    fn set_vertex_shader(&self, source: &str) {
        *self.vertex.lock() = Some(source.to_owned());
    }

    fn set_fragment_shader(&self, source: &str) {
        *self.fragment.lock() = Some(source.to_owned());
    }

    fn as_raw(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }
}

pub type FactoryResult = forgehook::BackendResult;
