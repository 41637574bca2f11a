//! Signature descriptors
//!
//! A `Signature` is built once per declared function and is immutable
//! afterwards. Every parameter and the result carry their declared logical
//! type, the converter chosen for them, the carrier type that converter
//! produces, and the resolved native type. Anything that fails to resolve
//! is a construction error.

use super::decl::{FunctionDecl, ParamDecl, ResultDecl};
use crate::closure::{ClosureManager, ClosureSite};
use crate::compiler::ArgClass;
use crate::convert::{
    ConversionContext, ConverterPipeline, Encoding, FromNativeConverter, ToNativeConverter,
};
use crate::error::{BindError, Result};
use crate::marshal::{self, Direction};
use crate::types::{
    AnnotationSet, CallingConvention, DataModel, ElementType, LogicalType, NativeType,
    TypeCatalog, Value,
};
use std::borrow::Cow;
use std::sync::Arc;

/// Inputs shared by every signature of one library
pub struct SignatureContext<'a> {
    pub catalog: &'a TypeCatalog,
    pub pipeline: &'a ConverterPipeline,
    pub closures: &'a ClosureManager,
    pub default_encoding: Encoding,
    pub default_convention: CallingConvention,
    pub save_error_default: bool,
}

/// How a parameter crosses the boundary
#[derive(Clone)]
pub enum ParamKind {
    /// Integer or address in an integer register
    Integer,
    Float32,
    Float64,
    /// Primitive array copied through a temporary buffer
    Array { element: ElementType, direction: Direction },
    /// Struct bytes copied through a temporary buffer
    Struct { direction: Direction },
    /// Managed callable turned into a closure pointer
    Callback(Arc<ClosureSite>),
}

impl ParamKind {
    #[inline]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Integer | Self::Float32 | Self::Float64)
    }
}

/// Resolved parameter
#[derive(Clone)]
pub struct ParameterType {
    pub declared: LogicalType,
    pub converter: Option<Arc<dyn ToNativeConverter>>,
    pub carrier: LogicalType,
    pub native: NativeType,
    pub annotations: AnnotationSet,
    pub ctx: ConversionContext,
    pub kind: ParamKind,
}

impl ParameterType {
    fn build(decl: &ParamDecl, env: &SignatureContext<'_>) -> Result<Self> {
        let ctx = ConversionContext::new(decl.annotations.clone(), env.default_encoding);
        let converter = env
            .pipeline
            .to_native(decl.converter.as_ref(), &decl.ty, &ctx)?;
        let (carrier, annotations) = match &converter {
            Some(conv) => (
                conv.native_type(),
                decl.annotations.merged(&conv.native_annotations()),
            ),
            None => (decl.ty.clone(), decl.annotations.clone()),
        };
        let native = env.catalog.native_type(&carrier, &annotations)?;

        let kind = match &carrier {
            LogicalType::Array(element) => ParamKind::Array {
                element: *element,
                direction: Direction::from_annotations(&annotations),
            },
            LogicalType::Struct(_) => ParamKind::Struct {
                direction: Direction::from_annotations(&annotations),
            },
            LogicalType::Callback(ty) => {
                ParamKind::Callback(Arc::new(ClosureSite::new(env.closures.factory(ty)?)))
            }
            ty if ty.is_scalar() => match native {
                NativeType::Float => ParamKind::Float32,
                NativeType::Double => ParamKind::Float64,
                _ => ParamKind::Integer,
            },
            ty => {
                return Err(BindError::UnsupportedType(format!(
                    "parameter of type {} cannot be passed to native code",
                    ty
                )))
            }
        };

        Ok(Self {
            declared: decl.ty.clone(),
            converter,
            carrier,
            native,
            annotations,
            ctx,
            kind,
        })
    }

    /// Value after the parameter's converter
    pub fn converted<'v>(&self, value: &'v Value) -> Result<Cow<'v, Value>> {
        match &self.converter {
            Some(conv) => conv.to_native(value, &self.ctx).map(Cow::Owned),
            None => Ok(Cow::Borrowed(value)),
        }
    }

    /// Register image of a scalar argument
    #[inline]
    pub fn register_image(&self, value: &Value, model: DataModel) -> Result<u64> {
        let value = self.converted(value)?;
        marshal::to_native(&value, &self.carrier, self.native, model)
    }

    pub fn arg_class(&self) -> ArgClass {
        ArgClass::of(self.native)
    }
}

/// Resolved result
#[derive(Clone)]
pub struct ResultType {
    pub declared: LogicalType,
    pub converter: Option<Arc<dyn FromNativeConverter>>,
    pub carrier: LogicalType,
    pub native: NativeType,
    pub ctx: ConversionContext,
}

impl ResultType {
    fn build(decl: &ResultDecl, env: &SignatureContext<'_>) -> Result<Self> {
        let ctx = ConversionContext::new(decl.annotations.clone(), env.default_encoding);
        let converter = env
            .pipeline
            .from_native(decl.converter.as_ref(), &decl.ty, &ctx)?;
        let carrier = converter
            .as_ref()
            .map_or_else(|| decl.ty.clone(), |conv| conv.native_type());
        if !(carrier.is_scalar() || carrier.is_void()) {
            return Err(BindError::UnsupportedType(format!(
                "result of type {} cannot be returned from native code",
                decl.ty
            )));
        }
        let native = env.catalog.native_type(&carrier, &decl.annotations)?;
        Ok(Self {
            declared: decl.ty.clone(),
            converter,
            carrier,
            native,
            ctx,
        })
    }

    /// Logical result from the widened native register image
    #[inline]
    pub fn to_value(&self, raw: u64, model: DataModel) -> Result<Value> {
        let value = marshal::from_native(raw, &self.carrier, self.native, model)?;
        match &self.converter {
            Some(conv) => conv.from_native(&value, &self.ctx),
            None => Ok(value),
        }
    }
}

/// Immutable description of one native function
#[derive(Clone)]
pub struct Signature {
    pub name: Arc<str>,
    pub params: Vec<ParameterType>,
    pub result: ResultType,
    pub convention: CallingConvention,
    pub save_error: bool,
    pub variadic: bool,
    pub model: DataModel,
    /// Encoding for text passed through variadic arguments
    pub default_encoding: Encoding,
}

impl Signature {
    pub fn build(decl: &FunctionDecl, env: &SignatureContext<'_>) -> Result<Self> {
        let params = decl
            .params
            .iter()
            .map(|p| ParameterType::build(p, env))
            .collect::<Result<Vec<_>>>()?;
        let result = ResultType::build(&decl.result, env)?;
        Ok(Self {
            name: Arc::clone(&decl.name),
            params,
            result,
            convention: decl.convention.unwrap_or(env.default_convention),
            save_error: decl.annotations.save_error(env.save_error_default),
            variadic: decl.variadic,
            model: env.catalog.model(),
            default_encoding: env.default_encoding,
        })
    }

    /// Every parameter travels in a register as a plain scalar
    pub fn is_scalar_only(&self) -> bool {
        self.params.iter().all(|p| p.kind.is_scalar())
    }

    /// Any parameter or the result goes through a converter
    pub fn has_converters(&self) -> bool {
        self.result.converter.is_some() || self.params.iter().any(|p| p.converter.is_some())
    }

    /// Every converter is context-free
    pub fn converters_context_free(&self) -> bool {
        self.params
            .iter()
            .filter_map(|p| p.converter.as_ref())
            .all(|c| c.flags().no_context)
            && self
                .result
                .converter
                .as_ref()
                .map_or(true, |c| c.flags().no_context)
    }

    pub fn arg_classes(&self) -> Vec<ArgClass> {
        self.params.iter().map(|p| p.arg_class()).collect()
    }

    /// `name(int, double) -> short` style summary
    pub fn describe(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.native.name()).collect();
        let tail = if self.variadic { ", ..." } else { "" };
        format!(
            "{}({}{}) -> {}",
            self.name,
            params.join(", "),
            tail,
            self.result.native.name()
        )
    }
}
