//! Tunables shared by the hooks.
//!
//! The window interceptor and the metrics spoofer both read
//! [`ForgeConfig::resolution`], so the window placement always agrees with the
//! screen size the legacy application is told about.

use crate::system::WM_USER;

/// Window class registered by the legacy application for its game window.
pub const GAME_WINDOW_CLASS: &str = "SWarClass";

/// Graphics factory symbol the legacy application resolves at runtime.
pub const GRAPHICS_FACTORY_SYMBOL: &str = "DirectDrawCreate";

/// Message posted to the game window to stop the message pump.
pub const WM_END_WND_PROC_WORKER: u32 = WM_USER + 27;

/// Fixed display resolution presented to the legacy application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution { width: 640, height: 480 }
    }
}

/// Text of the dialog shown when the user tries to close the game window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePrompt {
    pub caption: String,
    pub text: String,
}

impl Default for ClosePrompt {
    fn default() -> Self {
        ClosePrompt {
            caption: "Close".to_owned(),
            text: "The game window can only be closed from the game.".to_owned(),
        }
    }
}

/// Configuration for a [`Forge`](crate::Forge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeConfig {
    pub window_class: String,
    pub graphics_factory_symbol: String,
    pub resolution: Resolution,
    pub end_pump_message: u32,
    pub close_prompt: ClosePrompt,
    pub ui_thread_name: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        ForgeConfig {
            window_class: GAME_WINDOW_CLASS.to_owned(),
            graphics_factory_symbol: GRAPHICS_FACTORY_SYMBOL.to_owned(),
            resolution: Resolution::default(),
            end_pump_message: WM_END_WND_PROC_WORKER,
            close_prompt: ClosePrompt::default(),
            ui_thread_name: "forgehook-ui".to_owned(),
        }
    }
}

impl ForgeConfig {
    /// Match game windows by this class name instead.
    pub fn with_window_class(mut self, class: impl Into<String>) -> Self {
        self.window_class = class.into();
        self
    }

    /// Redirect this symbol instead of `DirectDrawCreate`.
    pub fn with_graphics_factory_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.graphics_factory_symbol = symbol.into();
        self
    }

    /// Present a different fixed resolution.
    pub fn with_resolution(mut self, width: i32, height: i32) -> Self {
        self.resolution = Resolution { width, height };
        self
    }

    /// Use a different sentinel message to stop the pump.
    pub fn with_end_pump_message(mut self, message: u32) -> Self {
        self.end_pump_message = message;
        self
    }

    pub fn with_close_prompt(
        mut self,
        caption: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.close_prompt = ClosePrompt { caption: caption.into(), text: text.into() };
        self
    }

    pub fn with_ui_thread_name(mut self, name: impl Into<String>) -> Self {
        self.ui_thread_name = name.into();
        self
    }
}
