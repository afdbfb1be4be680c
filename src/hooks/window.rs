//! `CreateWindowExA` replacement and the chained window procedure.
//!
//! The legacy application creates a fullscreen popup for its game window
//! class. That request is rewritten into a captioned window whose client area
//! has the legacy resolution, centered on the (spoofed) screen, and the
//! window procedure is chained so the non-client area renders correctly.

use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::Resolution;
use crate::error::{ForgeError, Result};
use crate::interceptor::Interceptor;
use crate::system::{
    Hwnd, Rect, WindowSystem, SM_CXSCREEN, SM_CYSCREEN, WM_CLOSE, WM_NCACTIVATE, WM_NCHITTEST,
    WM_NCLBUTTONDOWN, WM_NCLBUTTONUP, WM_NCMOUSEMOVE, WM_NCPAINT, WM_PAINT, WS_CAPTION, WS_POPUP,
    WS_SYSMENU, WS_VISIBLE,
};

/// Style of the rewritten game window.
pub const GAME_WINDOW_STYLE: u32 = WS_POPUP | WS_VISIBLE | WS_CAPTION | WS_SYSMENU;

/// Arguments of a `CreateWindowExA` call.
#[derive(Debug, Clone, Copy)]
pub struct CreateWindowRequest {
    pub ex_style: u32,
    pub class_name: *const c_char,
    pub window_name: *const c_char,
    pub style: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub parent: Hwnd,
    pub menu: isize,
    pub instance: isize,
    pub param: *mut c_void,
}

/// The `lpClassName` argument: either a class name or an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassName<'a> {
    Name(&'a CStr),
    Atom(u16),
}

impl<'a> ClassName<'a> {
    /// # Safety
    ///
    /// If `class_name` is above `0xFFFF` it must point to a nul-terminated
    /// string valid for `'a`.
    pub unsafe fn from_ptr(class_name: *const c_char) -> Self {
        if (class_name as usize) <= 0xFFFF {
            ClassName::Atom(class_name as usize as u16)
        } else {
            ClassName::Name(CStr::from_ptr(class_name))
        }
    }

    pub fn is(&self, class: &str) -> bool {
        match self {
            ClassName::Name(name) => name.to_bytes() == class.as_bytes(),
            ClassName::Atom(_) => false,
        }
    }
}

/// Outer window rectangle whose client area has size `resolution`, centered
/// on a `screen_width` by `screen_height` screen.
pub fn game_window_rect(
    system: &dyn WindowSystem,
    resolution: Resolution,
    screen_width: i32,
    screen_height: i32,
) -> Rect {
    let left = (screen_width - resolution.width) / 2;
    let top = (screen_height - resolution.height) / 2;
    let client = Rect::from_origin_size(left, top, resolution.width, resolution.height);

    system.adjust_window_rect(client, GAME_WINDOW_STYLE)
}

/// What the chained window procedure does with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WndProcAction {
    /// Handle with the platform default procedure only.
    Default,
    /// Ask the user for confirmation, then forward.
    ConfirmClose,
    /// Forward to the original procedure.
    Forward,
}

impl WndProcAction {
    pub fn for_message(msg: u32) -> Self {
        match msg {
            WM_NCACTIVATE | WM_NCHITTEST | WM_NCLBUTTONDOWN | WM_NCLBUTTONUP | WM_NCMOUSEMOVE
            | WM_NCPAINT | WM_PAINT => WndProcAction::Default,
            WM_CLOSE => WndProcAction::ConfirmClose,
            _ => WndProcAction::Forward,
        }
    }
}

impl Interceptor {
    /// Answer a `CreateWindowExA` call from the legacy application.
    ///
    /// Requests for any class other than the game window class are forwarded
    /// untouched. The game window request is rewritten, recorded, and gets the
    /// chained window procedure. Creating a second game window is an error.
    ///
    /// # Safety
    ///
    /// Same contract as `CreateWindowExA`.
    pub unsafe fn create_window(self: &Arc<Self>, req: CreateWindowRequest) -> Result<Hwnd> {
        let original = self.hooks.create_window.original();
        let class_name = ClassName::from_ptr(req.class_name);

        trace!(
            "CreateWindowExA called for class {class_name:?} ({}, {}), {}x{}",
            req.x,
            req.y,
            req.width,
            req.height
        );

        if !class_name.is(&self.config.window_class) {
            return Ok(original(
                req.ex_style,
                req.class_name,
                req.window_name,
                req.style,
                req.x,
                req.y,
                req.width,
                req.height,
                req.parent,
                req.menu,
                req.instance,
                req.param,
            ));
        }

        if self.window().is_some() {
            return Err(ForgeError::WindowAlreadyIntercepted);
        }

        let rect = game_window_rect(
            self.system.as_ref(),
            self.config.resolution,
            self.system_metrics(SM_CXSCREEN),
            self.system_metrics(SM_CYSCREEN),
        );

        trace!(
            "Rewriting CreateWindowExA call to ({}, {}), {}x{}",
            rect.left,
            rect.top,
            rect.width(),
            rect.height()
        );

        let hwnd = original(
            req.ex_style,
            req.class_name,
            req.window_name,
            GAME_WINDOW_STYLE,
            rect.left,
            rect.top,
            rect.width(),
            rect.height(),
            req.parent,
            req.menu,
            req.instance,
            req.param,
        );

        if hwnd.is_null() {
            error!("CreateWindowExA failed for the game window");
            return Ok(hwnd);
        }

        self.record_window(hwnd)?;

        let original_wndproc = self.system.window_proc(hwnd);
        let _ = self.original_wndproc.set(original_wndproc);
        self.system.set_window_proc(hwnd, self.replacements.window_proc);

        Ok(hwnd)
    }

    /// Reinstall the game window's own window procedure in place of the
    /// chained one. Nothing to do before the game window exists.
    pub(crate) fn restore_window_proc(&self) {
        let Some(hwnd) = self.window() else {
            return;
        };

        match self.original_window_proc() {
            Some(original) => {
                debug!("Restoring the window procedure of {hwnd:?}");
                self.system.set_window_proc(hwnd, original);
            },
            None => debug!("{hwnd:?} had no window procedure to restore"),
        }
    }

    /// The chained window procedure of the game window.
    ///
    /// # Safety
    ///
    /// Same contract as a `WNDPROC`.
    pub unsafe fn window_proc(&self, hwnd: Hwnd, msg: u32, wparam: usize, lparam: isize) -> isize {
        trace!("WndProc(..., {msg:#06x}, {wparam:#010x}, {lparam:#010x})");

        match WndProcAction::for_message(msg) {
            WndProcAction::Default => {
                return self.system.default_window_proc(hwnd, msg, wparam, lparam)
            },
            WndProcAction::ConfirmClose => {
                self.system.confirm_close(hwnd, &self.config.close_prompt)
            },
            WndProcAction::Forward => {},
        }

        match self.original_window_proc() {
            Some(wnd_proc) => self.system.call_window_proc(wnd_proc, hwnd, msg, wparam, lparam),
            None => self.system.default_window_proc(hwnd, msg, wparam, lparam),
        }
    }
}
