//! The slice of the OS window system the hooks rely on.
//!
//! Everything the interception policy needs from the platform that is *not*
//! reached through a hooked import goes through [`WindowSystem`]. The
//! [`Win32`](crate::win32::Win32) implementation talks to `user32`; tests
//! provide their own.

use std::ffi::{c_char, c_void};

use crate::config::ClosePrompt;
use crate::error::Result;

/// Raw window handle, ABI-compatible with `HWND`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hwnd(pub isize);

impl Hwnd {
    /// The null window handle.
    pub const NULL: Hwnd = Hwnd(0);

    /// Whether this is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Rectangle in screen coordinates, laid out like `RECT`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Rectangle with the given origin and size.
    pub fn from_origin_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect { left: x, top: y, right: x + width, bottom: y + height }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// A queued window message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Msg {
    pub hwnd: Hwnd,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
    pub time: u32,
    pub pt: (i32, i32),
}

/// Outcome of a blocking message retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// A message was retrieved.
    Message(Msg),
    /// The thread's queue was closed (`WM_QUIT`), or retrieval failed.
    Quit,
}

/// `CreateWindowExA`.
pub type CreateWindowExAFn = unsafe extern "system" fn(
    ex_style: u32,
    class_name: *const c_char,
    window_name: *const c_char,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: Hwnd,
    menu: isize,
    instance: isize,
    param: *mut c_void,
) -> Hwnd;

/// `GetSystemMetrics`.
pub type GetSystemMetricsFn = unsafe extern "system" fn(index: i32) -> i32;

/// `GetProcAddress`. The result is a nullable `FARPROC`.
pub type GetProcAddressFn =
    unsafe extern "system" fn(module: isize, name: *const c_char) -> *const c_void;

/// `WNDPROC`.
pub type WndProc =
    unsafe extern "system" fn(hwnd: Hwnd, msg: u32, wparam: usize, lparam: isize) -> isize;

/// `DirectDrawCreate`, the graphics factory the legacy application resolves
/// dynamically.
pub type GraphicsFactoryFn = unsafe extern "system" fn(
    guid: *mut c_void,
    out: *mut *mut c_void,
    outer: *mut c_void,
) -> i32;

// Window messages.
pub const WM_PAINT: u32 = 0x000F;
pub const WM_CLOSE: u32 = 0x0010;
pub const WM_NCHITTEST: u32 = 0x0084;
pub const WM_NCPAINT: u32 = 0x0085;
pub const WM_NCACTIVATE: u32 = 0x0086;
pub const WM_NCMOUSEMOVE: u32 = 0x00A0;
pub const WM_NCLBUTTONDOWN: u32 = 0x00A1;
pub const WM_NCLBUTTONUP: u32 = 0x00A2;
pub const WM_USER: u32 = 0x0400;

// System metrics indices.
pub const SM_CXSCREEN: i32 = 0;
pub const SM_CYSCREEN: i32 = 1;
pub const SM_CXFULLSCREEN: i32 = 16;
pub const SM_CYFULLSCREEN: i32 = 17;

// Window styles.
pub const WS_POPUP: u32 = 0x8000_0000;
pub const WS_VISIBLE: u32 = 0x1000_0000;
pub const WS_CAPTION: u32 = 0x00C0_0000;
pub const WS_SYSMENU: u32 = 0x0008_0000;

/// Platform window services used by the hooks and the message pump.
///
/// Implementations must be callable from both the control thread and the
/// message pump thread.
pub trait WindowSystem: Send + Sync {
    /// Grow a client rectangle into the outer window rectangle for `style`
    /// (`AdjustWindowRect` without a menu).
    fn adjust_window_rect(&self, client: Rect, style: u32) -> Rect;

    /// Current window procedure of `hwnd`, if any.
    fn window_proc(&self, hwnd: Hwnd) -> Option<WndProc>;

    /// Replace the window procedure of `hwnd`.
    fn set_window_proc(&self, hwnd: Hwnd, wnd_proc: WndProc);

    /// Invoke a previously captured window procedure (`CallWindowProcA`).
    ///
    /// # Safety
    ///
    /// `wnd_proc` must be a window procedure obtained from
    /// [`WindowSystem::window_proc`].
    unsafe fn call_window_proc(
        &self,
        wnd_proc: WndProc,
        hwnd: Hwnd,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> isize;

    /// The platform default window procedure (`DefWindowProcA`).
    fn default_window_proc(&self, hwnd: Hwnd, msg: u32, wparam: usize, lparam: isize) -> isize;

    /// Show a blocking dialog asking the user about closing the window.
    fn confirm_close(&self, hwnd: Hwnd, prompt: &ClosePrompt);

    /// Append a message to the queue of the thread owning `hwnd`.
    fn post_message(&self, hwnd: Hwnd, msg: u32, wparam: usize, lparam: isize) -> Result<()>;

    /// Block until the calling thread's queue yields a message.
    fn next_message(&self) -> PumpEvent;

    /// Translate and dispatch a retrieved message.
    fn translate_and_dispatch(&self, msg: &Msg);
}
