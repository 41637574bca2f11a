//! Process-scoped runtime
//!
//! Design: One `Runtime` ties together the pieces every library binding
//! shares: the native type catalog, the executable page allocator and the
//! closure manager. `Runtime::system()` is the lazily built process-wide
//! instance; tests and embedders may build private ones with their own
//! configuration or allocator.
//!
//! Counters are process-wide lock-free atomics, snapshotted by `stats()`.

use crate::closure::ClosureManager;
use crate::compiler::{PageAllocator, SystemPageAllocator};
use crate::config::RuntimeConfig;
use crate::convert::Encoding;
use crate::dispatch::{LibraryBinder, LibraryBinding, LibraryOptions};
use crate::error::Result;
use crate::invoke::{InterfaceDecl, Strategy, StrategyEnv};
use crate::library::SymbolLookup;
use crate::types::TypeCatalog;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const ZERO: AtomicUsize = AtomicUsize::new(0);

/// Process-wide event counters
pub struct Counters {
    stubs_compiled: AtomicUsize,
    page_blocks_allocated: AtomicUsize,
    page_blocks_freed: AtomicUsize,
    magazines_allocated: AtomicUsize,
    closures_allocated: AtomicUsize,
    closures_recycled: AtomicUsize,
    invokers_built: [AtomicUsize; 5],
    invokers_failed: AtomicUsize,
}

static COUNTERS: Counters = Counters {
    stubs_compiled: ZERO,
    page_blocks_allocated: ZERO,
    page_blocks_freed: ZERO,
    magazines_allocated: ZERO,
    closures_allocated: ZERO,
    closures_recycled: ZERO,
    invokers_built: [ZERO; 5],
    invokers_failed: ZERO,
};

#[inline]
pub(crate) fn counters() -> &'static Counters {
    &COUNTERS
}

impl Counters {
    #[inline]
    pub(crate) fn stub_compiled(&self) {
        self.stubs_compiled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn page_block_allocated(&self) {
        self.page_blocks_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn page_block_freed(&self) {
        self.page_blocks_freed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn magazine_allocated(&self) {
        self.magazines_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn closure_allocated(&self, recycled: bool) {
        let counter = if recycled {
            &self.closures_recycled
        } else {
            &self.closures_allocated
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn invoker_built(&self, strategy: Strategy) {
        self.invokers_built[strategy.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn invoker_failed(&self) {
        self.invokers_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RuntimeStats {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        let allocated = load(&self.page_blocks_allocated);
        let freed = load(&self.page_blocks_freed);
        RuntimeStats {
            stubs_compiled: load(&self.stubs_compiled),
            page_blocks_allocated: allocated,
            live_page_blocks: allocated.saturating_sub(freed),
            magazines_allocated: load(&self.magazines_allocated),
            closures_allocated: load(&self.closures_allocated),
            closures_recycled: load(&self.closures_recycled),
            invokers_built: [
                load(&self.invokers_built[0]),
                load(&self.invokers_built[1]),
                load(&self.invokers_built[2]),
                load(&self.invokers_built[3]),
                load(&self.invokers_built[4]),
            ],
            invokers_failed: load(&self.invokers_failed),
        }
    }
}

/// Snapshot of the process-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub stubs_compiled: usize,
    pub page_blocks_allocated: usize,
    pub live_page_blocks: usize,
    pub magazines_allocated: usize,
    pub closures_allocated: usize,
    pub closures_recycled: usize,
    /// Indexed by `Strategy::index`
    pub invokers_built: [usize; 5],
    pub invokers_failed: usize,
}

impl RuntimeStats {
    pub fn invokers(&self, strategy: Strategy) -> usize {
        self.invokers_built[strategy.index()]
    }
}

/// Counter snapshot
pub fn stats() -> RuntimeStats {
    counters().snapshot()
}

static SYSTEM: Lazy<Arc<Runtime>> = Lazy::new(|| {
    let config = RuntimeConfig::from_env();
    let config = match config.validate() {
        Ok(()) => config,
        Err(e) => {
            warn!(error = %e, "Ignoring invalid environment configuration");
            RuntimeConfig::default()
        }
    };
    Arc::new(Runtime::build(config, None))
});

/// Shared state behind every library binding
pub struct Runtime {
    config: RuntimeConfig,
    catalog: Arc<TypeCatalog>,
    allocator: Arc<dyn PageAllocator>,
    closures: Arc<ClosureManager>,
}

impl Runtime {
    /// Process-wide runtime configured from `DYNBIND_*` variables
    pub fn system() -> Arc<Runtime> {
        Arc::clone(&SYSTEM)
    }

    /// Runtime with the OS page allocator
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Runtime with a custom page allocator
    pub fn with_allocator(config: RuntimeConfig, allocator: Arc<dyn PageAllocator>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(allocator)))
    }

    fn build(config: RuntimeConfig, allocator: Option<Arc<dyn PageAllocator>>) -> Self {
        let allocator = allocator.unwrap_or_else(|| match config.page_size {
            Some(size) => Arc::new(SystemPageAllocator::with_page_size(size)),
            None => Arc::new(SystemPageAllocator::new()),
        });
        let catalog = Arc::new(TypeCatalog::new(config.data_model()));
        let closures = Arc::new(ClosureManager::new(
            Arc::clone(&catalog),
            Arc::clone(&allocator),
            config.magazine_pages,
            config.encoding(),
        ));
        info!(
            address_size = config.address_size,
            long_size = config.long_size,
            stubs = config.enable_stubs,
            fast_paths = config.enable_fast_paths,
            page_size = allocator.page_size(),
            "Runtime initialized"
        );
        Self {
            config,
            catalog,
            allocator,
            closures,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn allocator(&self) -> &Arc<dyn PageAllocator> {
        &self.allocator
    }

    pub fn closures(&self) -> &Arc<ClosureManager> {
        &self.closures
    }

    pub fn default_encoding(&self) -> Encoding {
        self.config.encoding()
    }

    /// Strategy switches for a library, after its own opt-outs
    pub fn strategy_env(&self, options: &LibraryOptions) -> StrategyEnv {
        StrategyEnv::new(
            self.catalog.model(),
            self.config.enable_stubs && !options.no_stubs,
            self.config.enable_fast_paths,
        )
    }

    /// Binder for one library
    pub fn binder(self: &Arc<Self>, lookup: Arc<dyn SymbolLookup>, options: LibraryOptions) -> LibraryBinder {
        LibraryBinder::new(Arc::clone(self), lookup, options)
    }

    /// Bind every declaration of `interface` against `lookup`
    ///
    /// Never fails as a whole; functions that cannot be bound fail on use.
    pub fn bind(
        self: &Arc<Self>,
        lookup: Arc<dyn SymbolLookup>,
        interface: &InterfaceDecl,
        options: LibraryOptions,
    ) -> LibraryBinding {
        self.binder(lookup, options).bind(interface)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("closure_types", &self.closures.len())
            .finish()
    }
}
