//! Native shape of a callback type
//!
//! Resolved once per callback type: how each native argument becomes a
//! managed value, how the managed result becomes a native register image,
//! and the libffi interface the trampolines are prepared with.

use crate::convert::{
    ConversionContext, ConverterPipeline, Encoding, FromNativeConverter, ToNativeConverter,
};
use crate::error::{BindError, Result};
use crate::invoke::{ArgSlot, CallInterface};
use crate::marshal;
use crate::types::{AnnotationSet, CallbackType, DataModel, LogicalType, NativeType, TypeCatalog, Value};
use std::ffi::c_void;
use std::sync::Arc;

struct ShapeParam {
    carrier: LogicalType,
    native: NativeType,
    converter: Option<Arc<dyn FromNativeConverter>>,
}

struct ShapeResult {
    carrier: LogicalType,
    native: NativeType,
    converter: Option<Arc<dyn ToNativeConverter>>,
}

/// Marshalling plan for one callback type
pub struct ClosureShape {
    ty: Arc<CallbackType>,
    params: Vec<ShapeParam>,
    result: ShapeResult,
    ctx: ConversionContext,
    interface: CallInterface,
    model: DataModel,
}

impl ClosureShape {
    pub fn build(
        ty: &Arc<CallbackType>,
        catalog: &TypeCatalog,
        pipeline: &ConverterPipeline,
        encoding: Encoding,
    ) -> Result<Self> {
        let ctx = ConversionContext::new(AnnotationSet::new(), encoding);
        let none = AnnotationSet::new();

        let mut params = Vec::with_capacity(ty.params.len());
        for declared in &ty.params {
            let converter = pipeline.from_native(None, declared, &ctx)?;
            let carrier = converter
                .as_ref()
                .map_or_else(|| declared.clone(), |c| c.native_type());
            if !carrier.is_scalar() {
                return Err(BindError::UnsupportedType(format!(
                    "callback parameter of type {} cannot be received from native code",
                    declared
                )));
            }
            let native = catalog.native_type(&carrier, &none)?;
            params.push(ShapeParam {
                carrier,
                native,
                converter,
            });
        }

        let converter = pipeline.to_native(None, &ty.result, &ctx)?;
        let carrier = converter
            .as_ref()
            .map_or_else(|| ty.result.clone(), |c| c.native_type());
        if !(carrier.is_scalar() || carrier.is_void()) {
            return Err(BindError::UnsupportedType(format!(
                "callback result of type {} cannot be returned to native code",
                ty.result
            )));
        }
        let native = catalog.native_type(&carrier, &none)?;
        let result = ShapeResult {
            carrier,
            native,
            converter,
        };

        let natives: Vec<NativeType> = params.iter().map(|p| p.native).collect();
        let model = catalog.model();
        let interface = CallInterface::new(&natives, result.native, ty.convention, model)?;

        Ok(Self {
            ty: Arc::clone(ty),
            params,
            result,
            ctx,
            interface,
            model,
        })
    }

    pub fn callback_type(&self) -> &Arc<CallbackType> {
        &self.ty
    }

    #[inline]
    pub fn result_native(&self) -> NativeType {
        self.result.native
    }

    #[inline]
    pub(crate) fn interface(&self) -> &CallInterface {
        &self.interface
    }

    /// Managed arguments from libffi's argument vector
    ///
    /// # Safety
    /// `args` must hold one valid pointer per declared parameter.
    pub(crate) unsafe fn arguments(&self, args: *const *const c_void) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.params.len());
        for (i, param) in self.params.iter().enumerate() {
            let raw = ArgSlot::read(*args.add(i), param.native, self.model);
            let value = marshal::from_native(raw, &param.carrier, param.native, self.model)?;
            values.push(match &param.converter {
                Some(conv) => conv.from_native(&value, &self.ctx)?,
                None => value,
            });
        }
        Ok(values)
    }

    /// Native register image of the callable's result
    pub(crate) fn result_image(&self, value: &Value) -> Result<u64> {
        if self.result.native == NativeType::Void {
            return Ok(0);
        }
        let value = match &self.result.converter {
            Some(conv) => conv.to_native(value, &self.ctx)?,
            None => value.clone(),
        };
        marshal::to_native(&value, &self.result.carrier, self.result.native, self.model)
    }
}
