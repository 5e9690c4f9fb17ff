use std::ffi::{CStr, c_void};
use std::mem::MaybeUninit;

use threadtrace_types::AddressInfo;

use crate::source::{Merge, SymbolSource};

/// What the dynamic linker knows about an address.
pub(crate) struct LinkerInfo<'a> {
    pub(crate) object_path: Option<&'a CStr>,
    pub(crate) object_base: usize,
    pub(crate) symbol: Option<&'a CStr>,
    pub(crate) symbol_address: usize,
}

/// Asks `dladdr` about `address`. The returned strings point into the
/// loader's tables and stay valid while the object remains loaded.
pub(crate) fn linker_info(address: usize) -> Option<LinkerInfo<'static>> {
    let mut info = MaybeUninit::<libc::Dl_info>::zeroed();
    // SAFETY: dladdr only reads `address` as a lookup key.
    let ok = unsafe { libc::dladdr(address as *const c_void, info.as_mut_ptr()) };
    if ok == 0 {
        return None;
    }
    // SAFETY: dladdr succeeded, so every field is initialized.
    let info = unsafe { info.assume_init() };

    // SAFETY: non-null names are NUL-terminated strings owned by the loader.
    let object_path = (!info.dli_fname.is_null()).then(|| unsafe { CStr::from_ptr(info.dli_fname) });
    let symbol = (!info.dli_sname.is_null()).then(|| unsafe { CStr::from_ptr(info.dli_sname) });

    Some(LinkerInfo {
        object_path,
        object_base: info.dli_fbase as usize,
        symbol,
        symbol_address: info.dli_saddr as usize,
    })
}

/// Object path and nearest preceding exported symbol, via `dladdr`.
pub struct DynamicLinkerSource;

impl SymbolSource for DynamicLinkerSource {
    fn name(&self) -> &'static str {
        "dynamic-linker"
    }

    fn merge(&self) -> Merge {
        Merge::FillEmpty
    }

    fn lookup(&self, address: usize, info: &mut AddressInfo) -> bool {
        let Some(linker) = linker_info(address) else {
            return false;
        };
        if let Some(path) = linker.object_path {
            info.object_name.set(&path.to_string_lossy());
        }
        if let Some(symbol) = linker.symbol {
            info.symbol_name.set(&symbol.to_string_lossy());
            info.symbol_address = linker.symbol_address;
        }
        info.has_any()
    }
}
