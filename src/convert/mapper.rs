//! Type mappers - pluggable converter lookup with memoization
//!
//! Design: A `CompositeTypeMapper` asks each mapper in turn and the first
//! converter returned wins. `CachingTypeMapper` memoizes cacheable results
//! per (logical type, annotation set); racing lookups for the same key share
//! one `OnceCell`, so exactly one converter is constructed.

use super::enums::{EnumConverter, EnumSetConverter};
use super::text::{TextConverter, TextResultConverter};
use super::{ConversionContext, FromNativeConverter, ToNativeConverter};
use crate::error::Result;
use crate::types::{AnnotationSet, LogicalType};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Converter lookup for logical types
pub trait TypeMapper: Send + Sync {
    fn to_native_converter(
        &self,
        _ty: &LogicalType,
        _ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        Ok(None)
    }

    fn from_native_converter(
        &self,
        _ty: &LogicalType,
        _ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        Ok(None)
    }
}

/// Converters for enums, enum sets and text
pub struct BuiltinTypeMapper;

impl TypeMapper for BuiltinTypeMapper {
    fn to_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        Ok(match ty {
            LogicalType::Enum(e) => Some(Arc::new(EnumConverter::new(e))),
            LogicalType::EnumSet(e) => Some(Arc::new(EnumSetConverter::new(e))),
            LogicalType::Text => Some(Arc::new(TextConverter::for_context(ctx)?)),
            _ => None,
        })
    }

    fn from_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        Ok(match ty {
            LogicalType::Enum(e) => Some(Arc::new(EnumConverter::new(e))),
            LogicalType::EnumSet(e) => Some(Arc::new(EnumSetConverter::new(e))),
            LogicalType::Text => Some(Arc::new(TextResultConverter::for_context(ctx)?)),
            _ => None,
        })
    }
}

/// Ordered chain of mappers
#[derive(Clone, Default)]
pub struct CompositeTypeMapper {
    mappers: Vec<Arc<dyn TypeMapper>>,
}

impl CompositeTypeMapper {
    pub fn new(mappers: Vec<Arc<dyn TypeMapper>>) -> Self {
        Self { mappers }
    }

    /// Append a mapper with lower priority than the existing ones
    pub fn push(&mut self, mapper: Arc<dyn TypeMapper>) {
        self.mappers.push(mapper);
    }
}

impl TypeMapper for CompositeTypeMapper {
    fn to_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        for mapper in &self.mappers {
            if let Some(conv) = mapper.to_native_converter(ty, ctx)? {
                return Ok(Some(conv));
            }
        }
        Ok(None)
    }

    fn from_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        for mapper in &self.mappers {
            if let Some(conv) = mapper.from_native_converter(ty, ctx)? {
                return Ok(Some(conv));
            }
        }
        Ok(None)
    }
}

/// Fixed converters registered per logical type
#[derive(Default)]
pub struct SimpleTypeMapper {
    to_native: HashMap<LogicalType, Arc<dyn ToNativeConverter>>,
    from_native: HashMap<LogicalType, Arc<dyn FromNativeConverter>>,
}

impl SimpleTypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_to_native(mut self, ty: LogicalType, conv: Arc<dyn ToNativeConverter>) -> Self {
        self.to_native.insert(ty, conv);
        self
    }

    pub fn with_from_native(mut self, ty: LogicalType, conv: Arc<dyn FromNativeConverter>) -> Self {
        self.from_native.insert(ty, conv);
        self
    }
}

impl TypeMapper for SimpleTypeMapper {
    fn to_native_converter(
        &self,
        ty: &LogicalType,
        _ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        Ok(self.to_native.get(ty).cloned())
    }

    fn from_native_converter(
        &self,
        ty: &LogicalType,
        _ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        Ok(self.from_native.get(ty).cloned())
    }
}

type CacheKey = (LogicalType, AnnotationSet);

/// Outcome of the first lookup for a key
enum Cached<T: ?Sized> {
    /// Shared by every later lookup (also caches "no converter")
    Shared(Option<Arc<T>>),
    /// Not cacheable; each lookup asks the inner mapper again
    PerSite,
}

/// Memoizing wrapper around another mapper
pub struct CachingTypeMapper {
    inner: Arc<dyn TypeMapper>,
    to_cache: DashMap<CacheKey, Arc<OnceCell<Cached<dyn ToNativeConverter>>>>,
    from_cache: DashMap<CacheKey, Arc<OnceCell<Cached<dyn FromNativeConverter>>>>,
}

impl CachingTypeMapper {
    pub fn new(inner: Arc<dyn TypeMapper>) -> Self {
        Self {
            inner,
            to_cache: DashMap::new(),
            from_cache: DashMap::new(),
        }
    }

    /// Number of keys with a published lookup
    pub fn cached(&self) -> usize {
        self.to_cache.len() + self.from_cache.len()
    }
}

impl TypeMapper for CachingTypeMapper {
    fn to_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        let key = (ty.clone(), ctx.annotations.clone());
        let cell = Arc::clone(
            &self
                .to_cache
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut built = None;
        let cached = cell.get_or_try_init(|| {
            let conv = self.inner.to_native_converter(ty, ctx)?;
            let shareable = conv.as_ref().map_or(true, |c| c.flags().cacheable);
            built = Some(conv.clone());
            Ok::<_, crate::error::BindError>(if shareable {
                Cached::Shared(conv)
            } else {
                Cached::PerSite
            })
        })?;

        match cached {
            Cached::Shared(conv) => Ok(conv.clone()),
            Cached::PerSite => match built {
                Some(conv) => Ok(conv),
                None => self.inner.to_native_converter(ty, ctx),
            },
        }
    }

    fn from_native_converter(
        &self,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        let key = (ty.clone(), ctx.annotations.clone());
        let cell = Arc::clone(
            &self
                .from_cache
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut built = None;
        let cached = cell.get_or_try_init(|| {
            let conv = self.inner.from_native_converter(ty, ctx)?;
            let shareable = conv.as_ref().map_or(true, |c| c.flags().cacheable);
            built = Some(conv.clone());
            Ok::<_, crate::error::BindError>(if shareable {
                Cached::Shared(conv)
            } else {
                Cached::PerSite
            })
        })?;

        match cached {
            Cached::Shared(conv) => Ok(conv.clone()),
            Cached::PerSite => match built {
                Some(conv) => Ok(conv),
                None => self.inner.from_native_converter(ty, ctx),
            },
        }
    }
}

/// Converter selection for one library binding
///
/// Explicit declaration converters take priority over the mapper chain,
/// which ends with the built-in converters.
pub struct ConverterPipeline {
    mapper: CachingTypeMapper,
}

impl ConverterPipeline {
    /// Pipeline with optional user mappers ahead of the built-ins
    pub fn new(custom: Option<Arc<dyn TypeMapper>>) -> Self {
        let mut chain = CompositeTypeMapper::default();
        if let Some(custom) = custom {
            chain.push(custom);
        }
        chain.push(Arc::new(BuiltinTypeMapper));
        Self {
            mapper: CachingTypeMapper::new(Arc::new(chain)),
        }
    }

    pub fn to_native(
        &self,
        explicit: Option<&Arc<dyn ToNativeConverter>>,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn ToNativeConverter>>> {
        if let Some(conv) = explicit {
            return Ok(Some(Arc::clone(conv)));
        }
        self.mapper.to_native_converter(ty, ctx)
    }

    pub fn from_native(
        &self,
        explicit: Option<&Arc<dyn FromNativeConverter>>,
        ty: &LogicalType,
        ctx: &ConversionContext,
    ) -> Result<Option<Arc<dyn FromNativeConverter>>> {
        if let Some(conv) = explicit {
            return Ok(Some(Arc::clone(conv)));
        }
        self.mapper.from_native_converter(ty, ctx)
    }

    pub fn cached(&self) -> usize {
        self.mapper.cached()
    }
}
