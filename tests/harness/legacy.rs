//! Stand-ins for the functions the loader resolved into the legacy image, and
//! the replacements installed over them.
//!
//! Originals record their calls in thread locals: the legacy side of every
//! test runs on the test's own thread, so parallel tests don't see each other.

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use forgehook::hooks::window::CreateWindowRequest;
use forgehook::system::{
    CreateWindowExAFn, GetProcAddressFn, GetSystemMetricsFn, GraphicsFactoryFn, Hwnd,
};
use forgehook::{Interceptor, Replacements};

use super::image::{ImageBuilder, TestImage, Thunk};

/// What the real `GetProcAddress` resolves every name to.
pub const RESOLVED_PROC: usize = 0x7A11_0000;

static NEXT_HWND: AtomicIsize = AtomicIsize::new(0x1_0000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    pub class: Option<String>,
    pub style: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub hwnd: Hwnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcCall {
    Name(isize, String),
    Ordinal(isize, u16),
}

thread_local! {
    static CURRENT_IMAGE: Cell<usize> = const { Cell::new(0) };
    static CREATED: RefCell<Vec<CreateCall>> = const { RefCell::new(Vec::new()) };
    static FAIL_CREATE: Cell<bool> = const { Cell::new(false) };
    static METRIC: Cell<i32> = const { Cell::new(0) };
    static METRIC_CALLS: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
    static PROC_CALLS: RefCell<Vec<ProcCall>> = const { RefCell::new(Vec::new()) };
}

/// Make replacements called on this thread use the interceptor of `image`.
pub fn enter(image: &TestImage) {
    CURRENT_IMAGE.with(|current| current.set(image.addr()));
}

fn current() -> Option<Arc<Interceptor>> {
    CURRENT_IMAGE.with(|current| Interceptor::for_image(current.get()))
}

pub fn created_windows() -> Vec<CreateCall> {
    CREATED.with(|created| created.borrow().clone())
}

pub fn fail_window_creation(fail: bool) {
    FAIL_CREATE.with(|f| f.set(fail));
}

/// Value the real `GetSystemMetrics` returns for every index.
pub fn set_metric(value: i32) {
    METRIC.with(|metric| metric.set(value));
}

pub fn metric_calls() -> Vec<i32> {
    METRIC_CALLS.with(|calls| calls.borrow().clone())
}

pub fn proc_calls() -> Vec<ProcCall> {
    PROC_CALLS.with(|calls| calls.borrow().clone())
}

unsafe fn class_of(class_name: *const c_char) -> Option<String> {
    ((class_name as usize) > 0xFFFF)
        .then(|| CStr::from_ptr(class_name).to_string_lossy().into_owned())
}

pub unsafe extern "system" fn real_create_window(
    _ex_style: u32,
    class_name: *const c_char,
    _window_name: *const c_char,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    _parent: Hwnd,
    _menu: isize,
    _instance: isize,
    _param: *mut c_void,
) -> Hwnd {
    let hwnd = if FAIL_CREATE.with(Cell::get) {
        Hwnd::NULL
    } else {
        Hwnd(NEXT_HWND.fetch_add(0x10, Ordering::SeqCst))
    };

    let call = CreateCall { class: class_of(class_name), style, x, y, width, height, hwnd };
    CREATED.with(|created| created.borrow_mut().push(call));

    hwnd
}

pub unsafe extern "system" fn real_system_metrics(index: i32) -> i32 {
    METRIC_CALLS.with(|calls| calls.borrow_mut().push(index));
    METRIC.with(Cell::get)
}

pub unsafe extern "system" fn real_proc_address(
    module: isize,
    name: *const c_char,
) -> *const c_void {
    let call = if (name as usize) <= 0xFFFF {
        ProcCall::Ordinal(module, name as usize as u16)
    } else {
        ProcCall::Name(module, CStr::from_ptr(name).to_string_lossy().into_owned())
    };
    PROC_CALLS.with(|calls| calls.borrow_mut().push(call));

    RESOLVED_PROC as *const c_void
}

unsafe extern "system" fn real_message_box(
    _: isize,
    _: *const c_char,
    _: *const c_char,
    _: u32,
) -> i32 {
    1
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_window_hook(
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
    let interceptor = current().expect("no interceptor for this thread's image");
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
    interceptor.create_window(req).unwrap()
}

unsafe extern "system" fn system_metrics_hook(index: i32) -> i32 {
    current().expect("no interceptor for this thread's image").system_metrics(index)
}

unsafe extern "system" fn proc_address_hook(module: isize, name: *const c_char) -> *const c_void {
    current().expect("no interceptor for this thread's image").proc_address(module, name)
}

unsafe extern "system" fn window_proc_hook(
    hwnd: Hwnd,
    msg: u32,
    wparam: usize,
    lparam: isize,
) -> isize {
    match Interceptor::for_window(hwnd) {
        Some(interceptor) => interceptor.window_proc(hwnd, msg, wparam, lparam),
        None => 0,
    }
}

unsafe extern "system" fn graphics_factory_hook(
    _guid: *mut c_void,
    out: *mut *mut c_void,
    _outer: *mut c_void,
) -> i32 {
    current().expect("no interceptor for this thread's image").create_graphics_backend(out).unwrap()
}

pub fn replacements() -> Replacements {
    Replacements {
        create_window: create_window_hook,
        system_metrics: system_metrics_hook,
        proc_address: proc_address_hook,
        window_proc: window_proc_hook,
        graphics_factory: graphics_factory_hook,
    }
}

/// The image of the legacy application: it imports the hooked functions and
/// a few others, including one import by ordinal.
pub fn legacy_image() -> TestImage {
    ImageBuilder::new()
        .import(
            "USER32.dll",
            vec![
                Thunk::Name("MessageBoxA", real_message_box as usize),
                Thunk::Name("CreateWindowExA", real_create_window as CreateWindowExAFn as usize),
                Thunk::Name("GetSystemMetrics", real_system_metrics as GetSystemMetricsFn as usize),
            ],
        )
        .import(
            "KERNEL32.dll",
            vec![
                Thunk::Ordinal(5, 0x5005),
                Thunk::Name("GetProcAddress", real_proc_address as GetProcAddressFn as usize),
            ],
        )
        .build()
}

/// Call `GetProcAddress` through the image, as the legacy application does.
pub unsafe fn resolve(image: &TestImage, module: isize, name: *const c_char) -> *const c_void {
    let get_proc_address: GetProcAddressFn = image.import("KERNEL32.dll", "GetProcAddress");
    get_proc_address(module, name)
}

/// Resolve and call the graphics factory the way the legacy application does.
pub unsafe fn call_graphics_factory(image: &TestImage) -> (i32, *mut c_void) {
    let factory = resolve(image, 0x4000, c"DirectDrawCreate".as_ptr());
    assert!(!factory.is_null());

    let factory: GraphicsFactoryFn = std::mem::transmute(factory);
    let mut out = 0x1 as *mut c_void;
    let hr = factory(ptr::null_mut(), &mut out, ptr::null_mut());
    (hr, out)
}
