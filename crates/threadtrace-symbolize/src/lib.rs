//! Maps raw code addresses to object, symbol and source location.
//!
//! Sources are tried in a fixed order: the dynamic linker, the module's own
//! debug info (`debug-info` feature) and the `backtrace` crate's resolver
//! (`unwinder-symbols` feature). See [`Merge`] for how answers combine.

#[cfg(all(unix, feature = "debug-info"))]
mod debug_info;
#[cfg(unix)]
mod dladdr;
mod error;
mod resolver;
mod source;
#[cfg(feature = "unwinder-symbols")]
mod unwinder;

use std::sync::OnceLock;

use threadtrace_types::AddressInfo;
use tracing::debug;

#[cfg(all(unix, feature = "debug-info"))]
pub use debug_info::DebugInfoSource;
#[cfg(unix)]
pub use dladdr::DynamicLinkerSource;
pub use error::SymbolizeError;
pub use resolver::{Resolver, ResolverOptions};
pub use source::{Merge, SymbolSource};
#[cfg(feature = "unwinder-symbols")]
pub use unwinder::UnwinderSource;

static RESOLVER: OnceLock<Resolver> = OnceLock::new();

pub fn init() -> &'static Resolver {
    init_with(ResolverOptions::default())
}

/// Builds the process-wide resolver. Only the first call's options count.
pub fn init_with(options: ResolverOptions) -> &'static Resolver {
    RESOLVER.get_or_init(|| {
        let resolver = Resolver::new(options);
        debug!(sources = ?resolver.source_names().collect::<Vec<_>>(), "address resolver ready");
        resolver
    })
}

/// Resolves through the process-wide resolver, building a default one on
/// first use.
///
/// Frame addresses other than a thread's innermost one are return
/// addresses, and the unwinder source looks up `address - 1` for every
/// address, frame 0 included. An innermost pc sitting exactly on a
/// function's first instruction can therefore be named after the function
/// before it.
pub fn resolve_address(address: usize) -> (AddressInfo, bool) {
    init().resolve(address)
}
