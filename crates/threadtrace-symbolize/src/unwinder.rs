use std::ffi::c_void;

use threadtrace_types::AddressInfo;

use crate::source::{Merge, SymbolSource, strip_rust_hash_suffix};

/// Symbols from the `backtrace` crate's resolver. Its names are demangled
/// and name closures, so they replace whatever earlier sources found.
///
/// `address` is treated as a return address: the resolver looks up
/// `address - 1`, so the exact pc of an innermost frame may resolve to the
/// preceding instruction's function when it sits on a function's first byte.
pub struct UnwinderSource;

/// Some resolver backends report the symbol's linked address rather than
/// its mapped one. Only accept a start that lies in the same loaded object
/// as `address`, at or below it.
fn plausible_symbol_start(address: usize, start: usize) -> bool {
    if start == 0 || start > address {
        return false;
    }
    #[cfg(unix)]
    if let Some(linker) = crate::dladdr::linker_info(address) {
        return start >= linker.object_base;
    }
    true
}

impl SymbolSource for UnwinderSource {
    fn name(&self) -> &'static str {
        "unwinder"
    }

    fn merge(&self) -> Merge {
        Merge::PreferSymbol
    }

    fn lookup(&self, address: usize, info: &mut AddressInfo) -> bool {
        let mut done = false;
        backtrace::resolve(address as *mut c_void, |symbol| {
            if done {
                return;
            }
            if let Some(name) = symbol.name() {
                info.symbol_name.set(strip_rust_hash_suffix(&name.to_string()));
                done = true;
            }
            if let Some(start) = symbol.addr()
                && plausible_symbol_start(address, start as usize)
            {
                info.symbol_address = start as usize;
            }
            if info.source_file.is_empty()
                && let Some(file) = symbol.filename()
            {
                info.source_file.set(&file.to_string_lossy());
                info.source_line = symbol.lineno().unwrap_or(0);
            }
        });
        info.has_any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn unwinder_marker() -> usize {
        std::hint::black_box(11)
    }

    #[test]
    fn names_a_local_function() {
        let start = unwinder_marker as *const () as usize;
        // Resolution treats the address as a return address.
        let address = start + 1;
        let mut info = AddressInfo::new(address);
        assert!(UnwinderSource.lookup(address, &mut info));
        assert!(
            info.symbol_name().is_some_and(|name| name.contains("unwinder_marker")),
            "{info}"
        );
        if let Some(symbol_start) = info.symbol_address() {
            assert_eq!(symbol_start, start, "{info}");
        }
    }

    #[test]
    fn unrelocated_starts_are_rejected() {
        let start = unwinder_marker as *const () as usize;
        assert!(plausible_symbol_start(start + 4, start));
        assert!(!plausible_symbol_start(start, start + 4));
        assert!(!plausible_symbol_start(start, 0));
        #[cfg(unix)]
        assert!(!plausible_symbol_start(start, 0x1000));
    }
}
