//! Symbol and line lookup from a module's own DWARF sections.
//!
//! Each module is opened once per resolving thread; a module that fails to
//! open is remembered as failed and not retried.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

use addr2line::Loader;
use object::{Object, ObjectSegment};
use threadtrace_types::AddressInfo;
use tracing::debug;

use crate::SymbolizeError;
use crate::dladdr::{LinkerInfo, linker_info};
use crate::source::{Merge, SymbolSource, strip_rust_hash_suffix};

enum ModuleState {
    Ready {
        loader: Box<Loader>,
        linked_image_base: u64,
        /// Symbol-table entries as `(linked address, name)`, sorted by address.
        symbols: Vec<(u64, String)>,
    },
    Failed,
}

thread_local! {
    static MODULES: RefCell<HashMap<PathBuf, ModuleState>> = RefCell::new(HashMap::new());
}

/// Names, start addresses and source lines from the module's symbol table
/// and DWARF. Its symbol is more precise than the dynamic linker's nearest
/// export, so it replaces it.
pub struct DebugInfoSource;

impl SymbolSource for DebugInfoSource {
    fn name(&self) -> &'static str {
        "debug-info"
    }

    fn merge(&self) -> Merge {
        Merge::PreferSymbol
    }

    fn lookup(&self, address: usize, info: &mut AddressInfo) -> bool {
        let Some(linker) = linker_info(address) else {
            return false;
        };
        let Some(path) = module_path(&linker) else {
            return false;
        };
        let object_base = linker.object_base;
        let offset = address.wrapping_sub(object_base) as u64;

        MODULES.with(|modules| {
            let mut modules = modules.borrow_mut();
            let state = match modules.entry(path) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let state = match open_module(entry.key()) {
                        Ok(state) => state,
                        Err(error) => {
                            debug!(%error, "debug info unavailable");
                            ModuleState::Failed
                        }
                    };
                    entry.insert(state)
                }
            };
            let ModuleState::Ready {
                loader,
                linked_image_base,
                symbols,
            } = state
            else {
                return false;
            };
            let Some(linked_address) = linked_image_base.checked_add(offset) else {
                let error = SymbolizeError::AddressOverflow {
                    base: *linked_image_base,
                    offset,
                };
                debug!(%error, "skipping debug info lookup");
                return false;
            };

            fill_from_loader(loader, linked_address, info);
            if let Some((start, name)) = containing_symbol(symbols, linked_address) {
                if info.symbol_name.is_empty() {
                    info.symbol_name.set(strip_rust_hash_suffix(name));
                }
                // Relocate from the linked address back to where it is mapped.
                info.symbol_address = (start - *linked_image_base) as usize + object_base;
            }
            info.has_any()
        })
    }
}

/// Path to open for the module described by `linker`. The dynamic linker
/// reports the main program as `argv[0]`, which need not be openable, so
/// that one is read through `/proc/self/exe`.
fn module_path(linker: &LinkerInfo<'_>) -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    if main_program_base() == Some(linker.object_base) {
        return Some(PathBuf::from("/proc/self/exe"));
    }
    linker
        .object_path
        .map(|path| PathBuf::from(path.to_string_lossy().into_owned()))
}

#[cfg(target_os = "linux")]
fn main_program_base() -> Option<usize> {
    static MAIN_BASE: OnceLock<Option<usize>> = OnceLock::new();
    *MAIN_BASE.get_or_init(|| {
        // SAFETY: getauxval has no preconditions.
        let entry = unsafe { libc::getauxval(libc::AT_ENTRY) } as usize;
        if entry == 0 {
            return None;
        }
        linker_info(entry).map(|info| info.object_base)
    })
}

fn open_module(path: &Path) -> Result<ModuleState, SymbolizeError> {
    let loader = Loader::new(path).map_err(|error| SymbolizeError::OpenModule {
        path: path.to_owned(),
        message: error.to_string(),
    })?;
    let (linked_image_base, symbols) = read_object_tables(path)?;
    Ok(ModuleState::Ready {
        loader: Box::new(loader),
        linked_image_base,
        symbols,
    })
}

/// Lowest virtual address of any file-backed segment (what the linker
/// assumed the module would be loaded at) and the symbol table.
fn read_object_tables(path: &Path) -> Result<(u64, Vec<(u64, String)>), SymbolizeError> {
    let data = std::fs::read(path).map_err(|error| SymbolizeError::OpenModule {
        path: path.to_owned(),
        message: error.to_string(),
    })?;
    let object = object::File::parse(&*data).map_err(|error| SymbolizeError::ParseObject {
        path: path.to_owned(),
        message: error.to_string(),
    })?;
    let linked_image_base = object
        .segments()
        .filter_map(|segment| {
            let (_, file_size) = segment.file_range();
            (file_size != 0).then(|| segment.address())
        })
        .min()
        .ok_or_else(|| SymbolizeError::NoFileBackedSegments {
            path: path.to_owned(),
        })?;
    let symbols = object
        .symbol_map()
        .symbols()
        .iter()
        .filter(|symbol| symbol.address() >= linked_image_base)
        .map(|symbol| (symbol.address(), symbol.name().to_owned()))
        .collect();
    Ok((linked_image_base, symbols))
}

fn containing_symbol(symbols: &[(u64, String)], linked_address: u64) -> Option<(u64, &str)> {
    let index = symbols.partition_point(|(start, _)| *start <= linked_address);
    let (start, name) = symbols.get(index.checked_sub(1)?)?;
    Some((*start, name.as_str()))
}

fn fill_from_loader(loader: &Loader, linked_address: u64, info: &mut AddressInfo) {
    if let Ok(mut frames) = loader.find_frames(linked_address) {
        while let Ok(Some(frame)) = frames.next() {
            if info.symbol_name.is_empty()
                && let Some(function) = frame.function
            {
                if let Ok(name) = function.demangle() {
                    info.symbol_name.set(strip_rust_hash_suffix(&name));
                } else if let Ok(name) = function.raw_name() {
                    info.symbol_name.set(strip_rust_hash_suffix(&name));
                }
            }
            if info.source_file.is_empty()
                && let Some(location) = frame.location
                && let Some(file) = location.file
            {
                info.source_file.set(file);
                info.source_line = location.line.unwrap_or(0);
            }
            if !info.symbol_name.is_empty() && !info.source_file.is_empty() {
                break;
            }
        }
    }

    if info.symbol_name.is_empty()
        && let Some(symbol) = loader.find_symbol(linked_address)
    {
        info.symbol_name.set(strip_rust_hash_suffix(symbol));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn resolvable_marker() -> usize {
        std::hint::black_box(7)
    }

    #[test]
    fn resolves_function_in_test_binary() {
        let start = resolvable_marker as *const () as usize;
        let address = start + 1;
        let mut info = AddressInfo::new(address);
        assert!(DebugInfoSource.lookup(address, &mut info));
        assert!(
            info.symbol_name().is_some_and(|name| name.contains("resolvable_marker")),
            "{info}"
        );
        assert_eq!(info.symbol_address(), Some(start), "{info}");
        assert_eq!(info.symbol_offset(), Some(1));
    }

    #[test]
    fn replaces_the_linker_symbol() {
        assert_eq!(DebugInfoSource.merge(), Merge::PreferSymbol);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn main_program_is_opened_through_proc() {
        let address = resolvable_marker as *const () as usize;
        let linker = linker_info(address).unwrap();
        assert_eq!(
            module_path(&linker),
            Some(PathBuf::from("/proc/self/exe"))
        );
    }

    #[test]
    fn containing_symbol_picks_preceding_entry() {
        let symbols = vec![(0x100, "a".to_owned()), (0x200, "b".to_owned())];
        assert_eq!(containing_symbol(&symbols, 0x50), None);
        assert_eq!(containing_symbol(&symbols, 0x100), Some((0x100, "a")));
        assert_eq!(containing_symbol(&symbols, 0x1ff), Some((0x100, "a")));
        assert_eq!(containing_symbol(&symbols, 0x900), Some((0x200, "b")));
    }

    #[test]
    fn missing_module_is_an_open_error() {
        let dir = std::env::temp_dir().join("threadtrace-no-such-module.so");
        assert!(matches!(
            read_object_tables(&dir),
            Err(SymbolizeError::OpenModule { .. })
        ));
    }
}
