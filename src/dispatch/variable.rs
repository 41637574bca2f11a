//! Global variable accessors

use crate::error::{BindError, Result};
use crate::invoke::{ArgSlot, VariableDecl};
use crate::library::SymbolLookup;
use crate::marshal;
use crate::types::{DataModel, LogicalType, NativeType, TypeCatalog, Value};
use std::sync::Arc;

/// Typed view of a native global
///
/// Reads and writes touch exactly the variable's native width.
pub struct NativeVariable {
    name: Arc<str>,
    ty: LogicalType,
    native: NativeType,
    model: DataModel,
    address: std::result::Result<usize, BindError>,
}

impl NativeVariable {
    /// Resolve `decl`; failures are replayed on every access
    pub fn bind(decl: &VariableDecl, lookup: &dyn SymbolLookup, catalog: &TypeCatalog) -> Self {
        let resolved = if decl.ty.is_scalar() {
            catalog.native_type(&decl.ty, &decl.annotations)
        } else {
            Err(BindError::UnsupportedType(format!(
                "global {} of type {} is not a scalar",
                decl.name, decl.ty
            )))
        };
        let (native, address) = match resolved {
            Ok(native) => (native, lookup.lookup(&decl.name)),
            Err(e) => (NativeType::Void, Err(e)),
        };
        Self {
            name: Arc::clone(&decl.name),
            ty: decl.ty.clone(),
            native,
            model: catalog.model(),
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_type(&self) -> NativeType {
        self.native
    }

    pub fn address(&self) -> Result<usize> {
        self.address.clone()
    }

    pub fn get(&self) -> Result<Value> {
        let address = self.address()?;
        // SAFETY: the symbol names a live global of the declared native type
        let raw = unsafe { ArgSlot::read(address as *const _, self.native, self.model) };
        marshal::from_native(raw, &self.ty, self.native, self.model)
    }

    pub fn set(&self, value: &Value) -> Result<()> {
        let address = self.address()?;
        let raw = marshal::to_native(value, &self.ty, self.native, self.model)?;
        let slot = ArgSlot::from_register(raw, self.native, self.model);
        let size = self.native.size(self.model);
        // SAFETY: every union field starts at offset 0, so the first `size`
        // bytes hold the value at native width; the global is writable
        unsafe {
            std::ptr::copy_nonoverlapping(
                &slot as *const ArgSlot as *const u8,
                address as *mut u8,
                size,
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for NativeVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeVariable")
            .field("name", &self.name)
            .field("native", &self.native)
            .field("bound", &self.address.is_ok())
            .finish()
    }
}
