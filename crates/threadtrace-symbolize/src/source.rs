use threadtrace_types::AddressInfo;

/// How a source's answer is folded into what earlier sources found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// Only fill fields that are still empty.
    FillEmpty,
    /// Overwrite the symbol name and address whenever this source has them;
    /// other fields are only filled when empty. The symbol may then disagree
    /// with a source line reported by an earlier source.
    PreferSymbol,
}

/// One way of mapping a code address to names.
pub trait SymbolSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge(&self) -> Merge {
        Merge::FillEmpty
    }

    /// Writes whatever this source knows about `address` into `info`, which
    /// starts out empty. Returns `false` when it knows nothing.
    fn lookup(&self, address: usize, info: &mut AddressInfo) -> bool;
}

pub(crate) fn merge_into(target: &mut AddressInfo, found: &AddressInfo, merge: Merge) {
    let take_symbol = match merge {
        Merge::FillEmpty => target.symbol_name.is_empty(),
        Merge::PreferSymbol => !found.symbol_name.is_empty(),
    };
    if take_symbol && !found.symbol_name.is_empty() {
        target.symbol_name = found.symbol_name;
        if found.symbol_address != 0 {
            target.symbol_address = found.symbol_address;
        }
    } else if target.symbol_address == 0 {
        target.symbol_address = found.symbol_address;
    }

    if target.object_name.is_empty() {
        target.object_name = found.object_name;
    }
    if target.source_file.is_empty() {
        target.source_file = found.source_file;
        if target.source_line == 0 {
            target.source_line = found.source_line;
        }
    }
}

/// Drops the `::h<hex>` disambiguator rustc appends to legacy-mangled names.
pub(crate) fn strip_rust_hash_suffix(name: &str) -> &str {
    if let Some(index) = name.rfind("::h") {
        let suffix = &name[index + 3..];
        if !suffix.is_empty() && suffix.chars().all(|character| character.is_ascii_hexdigit()) {
            return &name[..index];
        }
    }
    name
}
