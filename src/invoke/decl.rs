//! Declarations handed to the binder
//!
//! These are the already-scanned description of a native interface: one
//! entry per function or global variable, with logical types, annotations
//! and optional explicit converters.

use crate::convert::{FromNativeConverter, ToNativeConverter};
use crate::types::{Annotation, AnnotationSet, CallingConvention, LogicalType};
use std::sync::Arc;

/// One declared parameter
#[derive(Clone)]
pub struct ParamDecl {
    pub ty: LogicalType,
    pub annotations: AnnotationSet,
    pub converter: Option<Arc<dyn ToNativeConverter>>,
}

impl ParamDecl {
    pub fn new(ty: LogicalType) -> Self {
        Self {
            ty,
            annotations: AnnotationSet::new(),
            converter: None,
        }
    }
}

/// Declared result
#[derive(Clone)]
pub struct ResultDecl {
    pub ty: LogicalType,
    pub annotations: AnnotationSet,
    pub converter: Option<Arc<dyn FromNativeConverter>>,
}

impl ResultDecl {
    pub fn new(ty: LogicalType) -> Self {
        Self {
            ty,
            annotations: AnnotationSet::new(),
            converter: None,
        }
    }
}

/// Declared native function
#[derive(Clone)]
pub struct FunctionDecl {
    pub name: Arc<str>,
    pub params: Vec<ParamDecl>,
    pub result: ResultDecl,
    /// Falls back to the library default when unset
    pub convention: Option<CallingConvention>,
    /// Function-level annotations (`SaveError`, `IgnoreError`)
    pub annotations: AnnotationSet,
    /// Trailing arguments beyond `params` are accepted
    pub variadic: bool,
}

impl FunctionDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            params: Vec::new(),
            result: ResultDecl::new(LogicalType::Void),
            convention: None,
            annotations: AnnotationSet::new(),
            variadic: false,
        }
    }

    pub fn param(mut self, ty: LogicalType) -> Self {
        self.params.push(ParamDecl::new(ty));
        self
    }

    pub fn param_annotated(mut self, ty: LogicalType, annotations: AnnotationSet) -> Self {
        self.params.push(ParamDecl {
            ty,
            annotations,
            converter: None,
        });
        self
    }

    pub fn param_converted(mut self, ty: LogicalType, converter: Arc<dyn ToNativeConverter>) -> Self {
        self.params.push(ParamDecl {
            ty,
            annotations: AnnotationSet::new(),
            converter: Some(converter),
        });
        self
    }

    pub fn returns(mut self, ty: LogicalType) -> Self {
        self.result = ResultDecl::new(ty);
        self
    }

    pub fn returns_annotated(mut self, ty: LogicalType, annotations: AnnotationSet) -> Self {
        self.result = ResultDecl {
            ty,
            annotations,
            converter: None,
        };
        self
    }

    pub fn returns_converted(mut self, ty: LogicalType, converter: Arc<dyn FromNativeConverter>) -> Self {
        self.result = ResultDecl {
            ty,
            annotations: AnnotationSet::new(),
            converter: Some(converter),
        };
        self
    }

    pub fn convention(mut self, convention: CallingConvention) -> Self {
        self.convention = Some(convention);
        self
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.insert(annotation);
        self
    }

    pub fn save_error(self) -> Self {
        self.annotate(Annotation::SaveError)
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

/// Declared global variable
#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: Arc<str>,
    pub ty: LogicalType,
    pub annotations: AnnotationSet,
}

impl VariableDecl {
    pub fn new(name: &str, ty: LogicalType) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            annotations: AnnotationSet::new(),
        }
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.insert(annotation);
        self
    }
}

/// Everything declared for one library
#[derive(Clone, Default)]
pub struct InterfaceDecl {
    pub functions: Vec<FunctionDecl>,
    pub variables: Vec<VariableDecl>,
}

impl InterfaceDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    pub fn variable(mut self, decl: VariableDecl) -> Self {
        self.variables.push(decl);
        self
    }
}
