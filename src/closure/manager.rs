//! Closure manager - factories keyed by callback type

use super::factory::{ClosureFactory, FactoryStats};
use super::shape::ClosureShape;
use super::Callable;
use crate::compiler::PageAllocator;
use crate::convert::{ConverterPipeline, Encoding};
use crate::error::Result;
use crate::types::{CallbackType, TypeCatalog};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Owns one `ClosureFactory` per distinct callback type
pub struct ClosureManager {
    catalog: Arc<TypeCatalog>,
    pipeline: ConverterPipeline,
    allocator: Arc<dyn PageAllocator>,
    magazine_pages: usize,
    default_encoding: Encoding,
    factories: DashMap<Arc<CallbackType>, Arc<OnceCell<Arc<ClosureFactory>>>>,
}

impl ClosureManager {
    pub fn new(
        catalog: Arc<TypeCatalog>,
        allocator: Arc<dyn PageAllocator>,
        magazine_pages: usize,
        default_encoding: Encoding,
    ) -> Self {
        Self {
            catalog,
            // Callback shapes only see the built-in converters
            pipeline: ConverterPipeline::new(None),
            allocator,
            magazine_pages,
            default_encoding,
            factories: DashMap::new(),
        }
    }

    /// Factory for `ty`, built exactly once even under contention
    pub fn factory(&self, ty: &Arc<CallbackType>) -> Result<Arc<ClosureFactory>> {
        let cell = Arc::clone(
            self.factories
                .entry(Arc::clone(ty))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        // Shard lock released; shape construction may itself consult the registry
        cell.get_or_try_init(|| {
            let shape = ClosureShape::build(ty, &self.catalog, &self.pipeline, self.default_encoding)?;
            Ok(Arc::new(ClosureFactory::new(
                Arc::new(shape),
                Arc::clone(&self.allocator),
                self.magazine_pages,
            )))
        })
        .map(Arc::clone)
    }

    /// Native pointer for `callable` as a closure of type `ty`
    pub fn get_or_create(&self, ty: &Arc<CallbackType>, callable: &Arc<dyn Callable>) -> Result<usize> {
        self.factory(ty)?.get_or_create(callable)
    }

    /// Sweep dead registrations in every factory
    pub fn reclaim(&self) -> usize {
        self.built().iter().map(|f| f.reclaim()).sum()
    }

    /// Number of callback types with a factory
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Summed statistics over every factory
    pub fn stats(&self) -> FactoryStats {
        self.built().iter().map(|f| f.stats()).fold(FactoryStats::default(), |acc, s| FactoryStats {
            magazines: acc.magazines + s.magazines,
            slots_allocated: acc.slots_allocated + s.slots_allocated,
            slots_recycled: acc.slots_recycled + s.slots_recycled,
            live: acc.live + s.live,
            free: acc.free + s.free,
        })
    }

    fn built(&self) -> Vec<Arc<ClosureFactory>> {
        self.factories
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }
}
