//! Win32 glue: the [`Win32`] window system, import slot protection and the
//! `extern "system"` trampolines installed into the legacy application.
//!
//! The trampolines can't capture state. They look their [`Interceptor`] up by
//! the base address of the process image (import hooks) or by window handle
//! (window procedure). If no interceptor is registered any more, they fall back
//! to the real exports.

use std::ffi::{c_char, c_void, CString};
use std::mem::{self, size_of};
use std::sync::Arc;

use tracing::{error, trace};
use windows::core::PCSTR;
use windows::Win32::Foundation::{FALSE, HWND, LPARAM, RECT, WPARAM};
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};
#[cfg(target_arch = "x86")]
use windows::Win32::UI::WindowsAndMessaging::{GetWindowLongA, SetWindowLongA};
#[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
use windows::Win32::UI::WindowsAndMessaging::{GetWindowLongPtrA, SetWindowLongPtrA};
use windows::Win32::UI::WindowsAndMessaging::{
    AdjustWindowRect, CallWindowProcA, DefWindowProcA, DispatchMessageA, GetMessageA, MessageBoxA,
    PostMessageA, TranslateMessage, GWLP_WNDPROC, MB_OK, MSG, WINDOW_STYLE, WNDPROC,
};

use crate::config::ClosePrompt;
use crate::error::{abort_with, ForgeError, Result};
use crate::hook::{HookFn, ImportSlot};
use crate::hooks::proc_address::E_FAIL;
use crate::hooks::window::CreateWindowRequest;
use crate::hooks::{Replacements, KERNEL32, USER32};
use crate::iat::ImageImportPatcher;
use crate::interceptor::Interceptor;
use crate::system::{self, Hwnd, Msg, PumpEvent, Rect, WindowSystem, WndProc};
use crate::{Forge, ForgeBuilder};

const _: () = {
    use windows::Win32::UI::WindowsAndMessaging as wm;

    assert!(size_of::<Hwnd>() == size_of::<HWND>());
    assert!(size_of::<Rect>() == size_of::<RECT>());
    assert!(system::WM_PAINT == wm::WM_PAINT);
    assert!(system::WM_CLOSE == wm::WM_CLOSE);
    assert!(system::WM_NCHITTEST == wm::WM_NCHITTEST);
    assert!(system::WM_NCPAINT == wm::WM_NCPAINT);
    assert!(system::WM_NCACTIVATE == wm::WM_NCACTIVATE);
    assert!(system::WM_NCMOUSEMOVE == wm::WM_NCMOUSEMOVE);
    assert!(system::WM_NCLBUTTONDOWN == wm::WM_NCLBUTTONDOWN);
    assert!(system::WM_NCLBUTTONUP == wm::WM_NCLBUTTONUP);
    assert!(system::WM_USER == wm::WM_USER);
    assert!(system::SM_CXSCREEN == wm::SM_CXSCREEN.0);
    assert!(system::SM_CYSCREEN == wm::SM_CYSCREEN.0);
    assert!(system::SM_CXFULLSCREEN == wm::SM_CXFULLSCREEN.0);
    assert!(system::SM_CYFULLSCREEN == wm::SM_CYFULLSCREEN.0);
    assert!(system::WS_POPUP == wm::WS_POPUP.0);
    assert!(system::WS_VISIBLE == wm::WS_VISIBLE.0);
    assert!(system::WS_CAPTION == wm::WS_CAPTION.0);
    assert!(system::WS_SYSMENU == wm::WS_SYSMENU.0);
};

/// Base address of the current process' executable image.
pub fn process_image() -> Result<usize> {
    unsafe { GetModuleHandleA(PCSTR::null()) }
        .map(|module| module.0 as usize)
        .map_err(|_| ForgeError::InvalidImage("couldn't get the process image"))
}

/// Address currently exported by a loaded module, if any.
pub fn export_address(module: &str, symbol: &str) -> Option<usize> {
    let module = CString::new(module).ok()?;
    let symbol = CString::new(symbol).ok()?;

    unsafe {
        let handle = GetModuleHandleA(PCSTR(module.as_ptr().cast())).ok()?;
        GetProcAddress(handle, PCSTR(symbol.as_ptr().cast())).map(|f| f as usize)
    }
}

/// Makes an import slot writable for as long as it lives.
pub(crate) struct SlotUnlock {
    slot: ImportSlot,
    previous: PAGE_PROTECTION_FLAGS,
}

impl SlotUnlock {
    pub(crate) unsafe fn new(slot: ImportSlot) -> Result<Self> {
        let mut previous = PAGE_PROTECTION_FLAGS(0);

        let cell = slot.as_ptr() as *const c_void;
        VirtualProtect(cell, size_of::<usize>(), PAGE_READWRITE, &mut previous)
            .map_err(|e| ForgeError::Protect { addr: slot.addr(), reason: e.to_string() })?;

        Ok(Self { slot, previous })
    }
}

impl Drop for SlotUnlock {
    fn drop(&mut self) {
        let mut unused = PAGE_PROTECTION_FLAGS(0);

        let cell = self.slot.as_ptr() as *const c_void;

        let restored =
            unsafe { VirtualProtect(cell, size_of::<usize>(), self.previous, &mut unused) };
        if let Err(e) = restored {
            error!("Couldn't restore protection of import slot {:#x}: {e}", self.slot.addr());
        }
    }
}

/// [`WindowSystem`] backed by `user32`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32;

fn hwnd(hwnd: Hwnd) -> HWND {
    HWND(hwnd.0)
}

impl WindowSystem for Win32 {
    fn adjust_window_rect(&self, client: Rect, style: u32) -> Rect {
        let mut rect =
            RECT { left: client.left, top: client.top, right: client.right, bottom: client.bottom };

        if let Err(e) = unsafe { AdjustWindowRect(&mut rect, WINDOW_STYLE(style), FALSE) } {
            error!("AdjustWindowRect: {e}");
            return client;
        }

        Rect { left: rect.left, top: rect.top, right: rect.right, bottom: rect.bottom }
    }

    fn window_proc(&self, window: Hwnd) -> Option<WndProc> {
        #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
        let wnd_proc = unsafe { GetWindowLongPtrA(hwnd(window), GWLP_WNDPROC) } as usize;

        #[cfg(target_arch = "x86")]
        let wnd_proc = unsafe { GetWindowLongA(hwnd(window), GWLP_WNDPROC) } as usize;

        (wnd_proc != 0).then(|| unsafe { WndProc::from_addr(wnd_proc) })
    }

    fn set_window_proc(&self, window: Hwnd, wnd_proc: WndProc) {
        #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
        unsafe {
            SetWindowLongPtrA(hwnd(window), GWLP_WNDPROC, wnd_proc as usize as isize)
        };

        #[cfg(target_arch = "x86")]
        unsafe {
            SetWindowLongA(hwnd(window), GWLP_WNDPROC, wnd_proc as usize as i32)
        };
    }

    unsafe fn call_window_proc(
        &self,
        wnd_proc: WndProc,
        window: Hwnd,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> isize {
        let wnd_proc = mem::transmute::<WndProc, WNDPROC>(wnd_proc);
        CallWindowProcA(wnd_proc, hwnd(window), msg, WPARAM(wparam), LPARAM(lparam)).0
    }

    fn default_window_proc(&self, window: Hwnd, msg: u32, wparam: usize, lparam: isize) -> isize {
        unsafe { DefWindowProcA(hwnd(window), msg, WPARAM(wparam), LPARAM(lparam)) }.0
    }

    fn confirm_close(&self, window: Hwnd, prompt: &ClosePrompt) {
        let caption = CString::new(prompt.caption.as_str()).unwrap_or_default();
        let text = CString::new(prompt.text.as_str()).unwrap_or_default();

        let text = PCSTR(text.as_ptr().cast());
        let caption = PCSTR(caption.as_ptr().cast());
        unsafe { MessageBoxA(hwnd(window), text, caption, MB_OK) };
    }

    fn post_message(&self, window: Hwnd, msg: u32, wparam: usize, lparam: isize) -> Result<()> {
        unsafe { PostMessageA(hwnd(window), msg, WPARAM(wparam), LPARAM(lparam)) }
            .map_err(|e| ForgeError::PostMessage { message: msg, reason: e.to_string() })
    }

    fn next_message(&self) -> PumpEvent {
        let mut msg = MSG::default();

        match unsafe { GetMessageA(&mut msg, HWND(0), 0, 0) }.0 {
            -1 => {
                error!("GetMessageA: {}", windows::core::Error::from_win32());
                PumpEvent::Quit
            },
            0 => PumpEvent::Quit,
            _ => PumpEvent::Message(Msg {
                hwnd: Hwnd(msg.hwnd.0),
                message: msg.message,
                wparam: msg.wParam.0,
                lparam: msg.lParam.0,
                time: msg.time,
                pt: (msg.pt.x, msg.pt.y),
            }),
        }
    }

    fn translate_and_dispatch(&self, msg: &Msg) {
        let mut raw = MSG {
            hwnd: hwnd(msg.hwnd),
            message: msg.message,
            wParam: WPARAM(msg.wparam),
            lParam: LPARAM(msg.lparam),
            time: msg.time,
            ..Default::default()
        };
        raw.pt.x = msg.pt.0;
        raw.pt.y = msg.pt.1;

        unsafe {
            TranslateMessage(&raw);
            DispatchMessageA(&raw);
        }
    }
}

fn current() -> Option<Arc<Interceptor>> {
    process_image().ok().and_then(Interceptor::for_image)
}

unsafe fn real_export<F: HookFn>(module: &str, symbol: &str) -> F {
    match export_address(module, symbol) {
        Some(addr) => F::from_addr(addr),
        None => abort_with(&ForgeError::ImportUnresolved {
            module: module.to_owned(),
            symbol: symbol.to_owned(),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_window_ex_a_impl(
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
) -> Hwnd {
    let Some(interceptor) = current() else {
        let original: system::CreateWindowExAFn = real_export(USER32, "CreateWindowExA");
        return original(
            ex_style,
            class_name,
            window_name,
            style,
            x,
            y,
            width,
            height,
            parent,
            menu,
            instance,
            param,
        );
    };

    let req = CreateWindowRequest {
        ex_style,
        class_name,
        window_name,
        style,
        x,
        y,
        width,
        height,
        parent,
        menu,
        instance,
        param,
    };

    interceptor.create_window(req).unwrap_or_else(|e| abort_with(&e))
}

unsafe extern "system" fn get_system_metrics_impl(index: i32) -> i32 {
    match current() {
        Some(interceptor) => interceptor.system_metrics(index),
        None => real_export::<system::GetSystemMetricsFn>(USER32, "GetSystemMetrics")(index),
    }
}

unsafe extern "system" fn get_proc_address_impl(
    module: isize,
    name: *const c_char,
) -> *const c_void {
    match current() {
        Some(interceptor) => interceptor.proc_address(module, name),
        None => real_export::<system::GetProcAddressFn>(KERNEL32, "GetProcAddress")(module, name),
    }
}

unsafe extern "system" fn wnd_proc_impl(
    window: Hwnd,
    msg: u32,
    wparam: usize,
    lparam: isize,
) -> isize {
    match Interceptor::for_window(window) {
        Some(interceptor) => interceptor.window_proc(window, msg, wparam, lparam),
        None => DefWindowProcA(hwnd(window), msg, WPARAM(wparam), LPARAM(lparam)).0,
    }
}

unsafe extern "system" fn graphics_factory_impl(
    _guid: *mut c_void,
    out: *mut *mut c_void,
    _outer: *mut c_void,
) -> i32 {
    trace!("Substitute graphics factory called");

    match current() {
        Some(interceptor) => {
            interceptor.create_graphics_backend(out).unwrap_or_else(|e| abort_with(&e))
        },
        None => E_FAIL,
    }
}

impl Replacements {
    /// The crate's own trampolines.
    pub fn win32() -> Self {
        Replacements {
            create_window: create_window_ex_a_impl,
            system_metrics: get_system_metrics_impl,
            proc_address: get_proc_address_impl,
            window_proc: wnd_proc_impl,
            graphics_factory: graphics_factory_impl,
        }
    }
}

impl Forge {
    /// Builder for hooking the executable image of the current process with
    /// the [`Win32`] window system and the crate's trampolines.
    pub fn for_current_process() -> Result<ForgeBuilder> {
        let patcher = ImageImportPatcher::current_process()?;
        Ok(Forge::builder(Arc::new(patcher), Arc::new(Win32), Replacements::win32()))
    }
}
