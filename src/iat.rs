//! Import address table patching for loaded PE images.
//!
//! [`ImportDirectory`] walks the import descriptors of a mapped image (PE32 or
//! PE32+, matching the host word size) and finds the IAT cell the image calls
//! a given `module!symbol` through. [`ImageImportPatcher`] uses it to
//! implement [`ImportPatcher`].

use std::ffi::CStr;
use std::mem::{offset_of, size_of};
use std::ptr;

use tracing::trace;
#[cfg(target_pointer_width = "32")]
use windows::Win32::System::Diagnostics::Debug::{
    IMAGE_NT_HEADERS32 as IMAGE_NT_HEADERS, IMAGE_NT_OPTIONAL_HDR32_MAGIC as HOST_MAGIC,
};
#[cfg(target_pointer_width = "64")]
use windows::Win32::System::Diagnostics::Debug::{
    IMAGE_NT_HEADERS64 as IMAGE_NT_HEADERS, IMAGE_NT_OPTIONAL_HDR64_MAGIC as HOST_MAGIC,
};
use windows::Win32::System::Diagnostics::Debug::IMAGE_DIRECTORY_ENTRY_IMPORT;
#[cfg(target_pointer_width = "32")]
use windows::Win32::System::SystemServices::IMAGE_ORDINAL_FLAG32 as IMAGE_ORDINAL_FLAG;
#[cfg(target_pointer_width = "64")]
use windows::Win32::System::SystemServices::IMAGE_ORDINAL_FLAG64 as IMAGE_ORDINAL_FLAG;
use windows::Win32::System::SystemServices::{
    IMAGE_DOS_HEADER, IMAGE_DOS_SIGNATURE, IMAGE_IMPORT_BY_NAME, IMAGE_IMPORT_DESCRIPTOR,
    IMAGE_NT_SIGNATURE,
};

use crate::error::{ForgeError, Result};
use crate::hook::{ImportPatcher, ImportSlot, ImportTarget};

const THUNK_SIZE: usize = size_of::<usize>();
const ORDINAL_FLAG: usize = IMAGE_ORDINAL_FLAG as usize;

/// Copy a `T` out of the image at `offset`. PE structures are not guaranteed
/// to be aligned in memory.
unsafe fn read<T>(base: *const u8, offset: usize) -> T {
    ptr::read_unaligned(base.add(offset).cast::<T>())
}

/// The import directory of a mapped image.
pub struct ImportDirectory {
    base: *const u8,
    descriptors: u32,
}

impl ImportDirectory {
    /// Parse the headers of the image mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a PE image mapped the way the loader maps it, and
    /// the image must outlive the returned value.
    pub unsafe fn parse(base: *const u8) -> Result<Self> {
        if base.is_null() {
            return Err(ForgeError::InvalidImage("null image base"));
        }

        let dos_header: IMAGE_DOS_HEADER = read(base, 0);
        if dos_header.e_magic != IMAGE_DOS_SIGNATURE {
            return Err(ForgeError::InvalidImage("bad DOS signature"));
        }

        let nt_headers: IMAGE_NT_HEADERS = read(base, dos_header.e_lfanew as usize);
        if nt_headers.Signature != IMAGE_NT_SIGNATURE {
            return Err(ForgeError::InvalidImage("bad NT signature"));
        }

        // The magic sits at the same offset in both optional header layouts.
        let optional_header = nt_headers.OptionalHeader;
        if optional_header.Magic != HOST_MAGIC {
            return Err(ForgeError::InvalidImage("image word size doesn't match the host"));
        }

        let index = IMAGE_DIRECTORY_ENTRY_IMPORT.0 as usize;
        if optional_header.NumberOfRvaAndSizes as usize <= index {
            return Err(ForgeError::InvalidImage("no import directory"));
        }

        let directories = optional_header.DataDirectory;
        let descriptors = directories[index].VirtualAddress;
        if descriptors == 0 {
            return Err(ForgeError::InvalidImage("no import directory"));
        }

        Ok(Self { base, descriptors })
    }

    fn descriptors(&self) -> impl Iterator<Item = IMAGE_IMPORT_DESCRIPTOR> + '_ {
        (0..)
            .map(move |i| unsafe {
                let offset = self.descriptors as usize + i * size_of::<IMAGE_IMPORT_DESCRIPTOR>();
                read::<IMAGE_IMPORT_DESCRIPTOR>(self.base, offset)
            })
            .take_while(|desc| desc.Name != 0)
    }

    unsafe fn c_str(&self, rva: usize) -> &CStr {
        CStr::from_ptr(self.base.add(rva).cast())
    }

    fn module_descriptors<'a>(
        &'a self,
        module: &'a str,
    ) -> impl Iterator<Item = IMAGE_IMPORT_DESCRIPTOR> + 'a {
        self.descriptors().filter(move |desc| {
            let name = unsafe { self.c_str(desc.Name as usize) };
            name.to_bytes().eq_ignore_ascii_case(module.as_bytes())
        })
    }

    unsafe fn iat_cell(&self, desc: &IMAGE_IMPORT_DESCRIPTOR, index: usize) -> *mut usize {
        self.base.add(desc.FirstThunk as usize + index * THUNK_SIZE) as *mut usize
    }

    /// Find the IAT cell through which `module!symbol` is called, using the
    /// import name table. Imports by ordinal are skipped.
    pub fn find(&self, module: &str, symbol: &str) -> Option<ImportSlot> {
        for desc in self.module_descriptors(module) {
            let name_table = unsafe { desc.Anonymous.OriginalFirstThunk } as usize;
            if name_table == 0 {
                continue;
            }

            for index in 0.. {
                let thunk: usize = unsafe { read(self.base, name_table + index * THUNK_SIZE) };
                if thunk == 0 {
                    break;
                }
                if thunk & ORDINAL_FLAG != 0 {
                    continue;
                }

                let name = unsafe { self.c_str(thunk + offset_of!(IMAGE_IMPORT_BY_NAME, Name)) };
                if name.to_bytes() == symbol.as_bytes() {
                    return Some(unsafe { ImportSlot::from_ptr(self.iat_cell(&desc, index)) });
                }
            }
        }

        None
    }

    /// Find the IAT cell of `module` currently holding `value`. Used for images
    /// linked without an import name table.
    pub fn find_by_value(&self, module: &str, value: usize) -> Option<ImportSlot> {
        for desc in self.module_descriptors(module) {
            for index in 0.. {
                let cell = unsafe { self.iat_cell(&desc, index) };
                match unsafe { ptr::read_volatile(cell) } {
                    0 => break,
                    v if v == value => return Some(unsafe { ImportSlot::from_ptr(cell) }),
                    _ => {},
                }
            }
        }

        None
    }
}

/// [`ImportPatcher`] operating on a PE image mapped in the current process.
#[derive(Debug)]
pub struct ImageImportPatcher {
    base: usize,
}

impl ImageImportPatcher {
    /// # Safety
    ///
    /// `base` must point to a mapped PE image that outlives the patcher and
    /// every hook created from it.
    pub unsafe fn new(base: *const u8) -> Result<Self> {
        ImportDirectory::parse(base)?;
        Ok(Self { base: base as usize })
    }

    /// Patcher for the executable image of the current process.
    #[cfg(windows)]
    pub fn current_process() -> Result<Self> {
        let base = crate::win32::process_image()?;
        unsafe { Self::new(base as *const u8) }
    }

    fn directory(&self) -> Result<ImportDirectory> {
        unsafe { ImportDirectory::parse(self.base as *const u8) }
    }
}

impl ImportPatcher for ImageImportPatcher {
    fn image(&self) -> usize {
        self.base
    }

    fn locate(&self, target: &ImportTarget) -> Result<ImportSlot> {
        let directory = self.directory()?;

        let slot = directory.find(&target.module, &target.symbol);

        #[cfg(windows)]
        let slot = slot.or_else(|| {
            crate::win32::export_address(&target.module, &target.symbol)
                .and_then(|addr| directory.find_by_value(&target.module, addr))
        });

        let slot = slot.ok_or_else(|| ForgeError::ImportNotFound {
            module: target.module.clone(),
            symbol: target.symbol.clone(),
        })?;

        trace!("{target} is imported through {:#x}", slot.addr());
        Ok(slot)
    }

    unsafe fn swap(&self, slot: ImportSlot, value: usize) -> Result<usize> {
        #[cfg(windows)]
        let _unlocked = crate::win32::SlotUnlock::new(slot)?;

        Ok(slot.swap(value))
    }
}
