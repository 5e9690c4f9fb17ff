use threadtrace_types::AddressInfo;

use crate::source::{SymbolSource, merge_into};

/// Which of the compiled-in sources to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    pub dynamic_linker: bool,
    pub debug_info: bool,
    pub unwinder: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            dynamic_linker: true,
            debug_info: true,
            unwinder: true,
        }
    }
}

/// Tries each source in order and folds the answers together.
pub struct Resolver {
    sources: Vec<Box<dyn SymbolSource>>,
}

impl Resolver {
    pub fn new(options: ResolverOptions) -> Self {
        let mut sources: Vec<Box<dyn SymbolSource>> = Vec::new();
        #[cfg(unix)]
        if options.dynamic_linker {
            sources.push(Box::new(crate::DynamicLinkerSource));
        }
        #[cfg(all(unix, feature = "debug-info"))]
        if options.debug_info {
            sources.push(Box::new(crate::DebugInfoSource));
        }
        #[cfg(feature = "unwinder-symbols")]
        if options.unwinder {
            sources.push(Box::new(crate::UnwinderSource));
        }
        let _ = options;
        Self { sources }
    }

    pub fn with_sources(sources: Vec<Box<dyn SymbolSource>>) -> Self {
        Self { sources }
    }

    pub fn source_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sources.iter().map(|source| source.name())
    }

    /// Returns everything known about `address`, and whether any source
    /// knew anything at all.
    pub fn resolve(&self, address: usize) -> (AddressInfo, bool) {
        let mut info = AddressInfo::new(address);
        let mut found = false;
        for source in &self.sources {
            let mut partial = AddressInfo::new(address);
            if source.lookup(address, &mut partial) && partial.has_any() {
                merge_into(&mut info, &partial, source.merge());
                found = true;
            }
        }
        (info, found)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverOptions::default())
    }
}
