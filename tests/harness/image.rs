//! PE images synthesized in memory, laid out the way the loader maps them, so
//! the import walker and patcher run against real import directories.

use std::collections::HashMap;
use std::mem::{offset_of, size_of};
use std::ptr;
use std::sync::Arc;

use forgehook::hook::HookFn;
use forgehook::iat::ImageImportPatcher;
use windows::Win32::System::Diagnostics::Debug::{
    IMAGE_DATA_DIRECTORY, IMAGE_DIRECTORY_ENTRY_IMPORT, IMAGE_NT_HEADERS32, IMAGE_NT_HEADERS64,
    IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_OPTIONAL_HEADER_MAGIC,
};
use windows::Win32::System::SystemServices::{
    IMAGE_DOS_HEADER, IMAGE_DOS_SIGNATURE, IMAGE_IMPORT_BY_NAME, IMAGE_IMPORT_DESCRIPTOR,
    IMAGE_NT_SIGNATURE,
};

pub const PE32_MAGIC: u16 = IMAGE_NT_OPTIONAL_HDR32_MAGIC.0;
pub const PE32_PLUS_MAGIC: u16 = IMAGE_NT_OPTIONAL_HDR64_MAGIC.0;

#[cfg(target_pointer_width = "64")]
pub const HOST_MAGIC: u16 = PE32_PLUS_MAGIC;
#[cfg(target_pointer_width = "32")]
pub const HOST_MAGIC: u16 = PE32_MAGIC;

/// Where the NT headers start in synthesized images.
pub const NT_OFFSET: usize = 0x80;
/// Size of the header area. Import data follows it.
pub const HEADERS_SIZE: usize = 0x400;
const DESCRIPTOR_SIZE: usize = size_of::<IMAGE_IMPORT_DESCRIPTOR>();
const ORDINAL_FLAG: usize = 1 << (usize::BITS - 1);

/// One import of a module, with the address the "loader" resolved it to.
pub enum Thunk {
    Name(&'static str, usize),
    Ordinal(u16, usize),
}

impl Thunk {
    fn resolved(&self) -> usize {
        match self {
            Thunk::Name(_, addr) | Thunk::Ordinal(_, addr) => *addr,
        }
    }
}

pub struct ImageBuilder {
    modules: Vec<(&'static str, Vec<Thunk>)>,
    name_table: bool,
    magic: u16,
    dos_magic: u16,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            name_table: true,
            magic: HOST_MAGIC,
            dos_magic: IMAGE_DOS_SIGNATURE,
        }
    }

    pub fn import(mut self, module: &'static str, thunks: Vec<Thunk>) -> Self {
        self.modules.push((module, thunks));
        self
    }

    /// Leave `OriginalFirstThunk` empty, like images bound without an import
    /// name table.
    pub fn without_name_table(mut self) -> Self {
        self.name_table = false;
        self
    }

    pub fn with_magic(mut self, magic: u16) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_dos_magic(mut self, magic: u16) -> Self {
        self.dos_magic = magic;
        self
    }

    fn write_headers(&self, bytes: &mut [u8], imports: IMAGE_DATA_DIRECTORY) {
        let dos_header = IMAGE_DOS_HEADER {
            e_magic: self.dos_magic,
            e_lfanew: NT_OFFSET as i32,
            ..Default::default()
        };
        put(bytes, 0, dos_header);

        let index = IMAGE_DIRECTORY_ENTRY_IMPORT.0 as usize;
        let magic = IMAGE_OPTIONAL_HEADER_MAGIC(self.magic);

        if self.magic == PE32_MAGIC {
            let mut nt_headers =
                IMAGE_NT_HEADERS32 { Signature: IMAGE_NT_SIGNATURE, ..Default::default() };
            nt_headers.OptionalHeader.Magic = magic;
            nt_headers.OptionalHeader.NumberOfRvaAndSizes = 16;
            nt_headers.OptionalHeader.DataDirectory[index] = imports;
            put(bytes, NT_OFFSET, nt_headers);
        } else {
            let mut nt_headers =
                IMAGE_NT_HEADERS64 { Signature: IMAGE_NT_SIGNATURE, ..Default::default() };
            nt_headers.OptionalHeader.Magic = magic;
            nt_headers.OptionalHeader.NumberOfRvaAndSizes = 16;
            nt_headers.OptionalHeader.DataDirectory[index] = imports;
            put(bytes, NT_OFFSET, nt_headers);
        }
    }

    pub fn build(self) -> TestImage {
        let mut bytes = vec![0u8; HEADERS_SIZE];

        let descriptors = bytes.len();
        let descriptors_size = (self.modules.len() + 1) * DESCRIPTOR_SIZE;
        bytes.resize(descriptors + descriptors_size, 0);
        let imports = IMAGE_DATA_DIRECTORY {
            VirtualAddress: descriptors as u32,
            Size: descriptors_size as u32,
        };
        self.write_headers(&mut bytes, imports);

        let mut slots = HashMap::new();

        for (i, (module, thunks)) in self.modules.iter().enumerate() {
            let name = push_str(&mut bytes, module);

            let entries: Vec<usize> = thunks
                .iter()
                .map(|thunk| match thunk {
                    Thunk::Name(symbol, _) => {
                        align(&mut bytes, 2);
                        let hint_name = bytes.len();
                        bytes.resize(hint_name + offset_of!(IMAGE_IMPORT_BY_NAME, Name), 0);
                        push_str(&mut bytes, symbol);
                        hint_name
                    },
                    Thunk::Ordinal(ordinal, _) => ORDINAL_FLAG | *ordinal as usize,
                })
                .collect();

            let int = push_thunks(&mut bytes, &entries);
            let iat =
                push_thunks(&mut bytes, &thunks.iter().map(Thunk::resolved).collect::<Vec<_>>());

            let mut desc = IMAGE_IMPORT_DESCRIPTOR {
                Name: name as u32,
                FirstThunk: iat as u32,
                ..Default::default()
            };
            if self.name_table {
                desc.Anonymous.OriginalFirstThunk = int as u32;
            }
            put(&mut bytes, descriptors + i * DESCRIPTOR_SIZE, desc);

            for (j, thunk) in thunks.iter().enumerate() {
                if let Thunk::Name(symbol, _) = thunk {
                    let key = (module.to_string(), symbol.to_string());
                    slots.insert(key, iat + j * size_of::<usize>());
                }
            }
        }

        TestImage::map(&bytes, slots)
    }
}

fn put<T>(bytes: &mut [u8], offset: usize, value: T) {
    assert!(offset + size_of::<T>() <= bytes.len());
    unsafe { ptr::write_unaligned(bytes.as_mut_ptr().add(offset).cast::<T>(), value) };
}

fn align(bytes: &mut Vec<u8>, to: usize) {
    while bytes.len() % to != 0 {
        bytes.push(0);
    }
}

fn push_str(bytes: &mut Vec<u8>, s: &str) -> usize {
    let offset = bytes.len();
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    offset
}

fn push_thunks(bytes: &mut Vec<u8>, thunks: &[usize]) -> usize {
    align(bytes, size_of::<usize>());
    let offset = bytes.len();
    for thunk in thunks.iter().chain(std::iter::once(&0)) {
        bytes.extend_from_slice(&thunk.to_ne_bytes());
    }
    offset
}

/// A mapped synthesized image. Must outlive every hook patching it.
pub struct TestImage {
    base: *mut u64,
    words: usize,
    slots: HashMap<(String, String), usize>,
}

impl TestImage {
    fn map(bytes: &[u8], slots: HashMap<(String, String), usize>) -> Self {
        let words = (bytes.len() + 7) / 8;
        let base = Box::into_raw(vec![0u64; words].into_boxed_slice()) as *mut u64;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), base as *mut u8, bytes.len()) };

        Self { base, words, slots }
    }

    pub fn base(&self) -> *const u8 {
        self.base as *const u8
    }

    pub fn addr(&self) -> usize {
        self.base as usize
    }

    fn cell(&self, module: &str, symbol: &str) -> *mut usize {
        let offset = self.slots[&(module.to_owned(), symbol.to_owned())];
        unsafe { (self.base as *mut u8).add(offset) as *mut usize }
    }

    /// Address of the IAT cell of `module!symbol`.
    pub fn slot_addr(&self, module: &str, symbol: &str) -> usize {
        self.cell(module, symbol) as usize
    }

    /// Current contents of the IAT cell of `module!symbol`.
    pub fn slot(&self, module: &str, symbol: &str) -> usize {
        unsafe { std::ptr::read_volatile(self.cell(module, symbol)) }
    }

    /// The function the image would call for `module!symbol` right now.
    pub fn import<F: HookFn>(&self, module: &str, symbol: &str) -> F {
        unsafe { F::from_addr(self.slot(module, symbol)) }
    }

    pub fn patcher(&self) -> Arc<ImageImportPatcher> {
        Arc::new(unsafe { ImageImportPatcher::new(self.base()) }.unwrap())
    }
}

impl Drop for TestImage {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.base, self.words)));
        }
    }
}
