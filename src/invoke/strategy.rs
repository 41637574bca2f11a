//! Invocation strategy selection
//!
//! Strategies are tried in a fixed priority order and the first whose
//! predicate accepts the signature builds the call path. The generic buffer
//! strategy accepts everything, so selection only fails for a custom order
//! that leaves it out.

use super::signature::{ParamKind, Signature};
use crate::compiler::{fits_registers, stubs_supported};
use crate::error::{BindError, Result};
use crate::types::{CallingConvention, DataModel, NativeType};

/// Fixed-arity fast paths take at most this many arguments
pub const MAX_FAST_ARITY: usize = 6;

/// Call path generators, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Generated x86-64 machine-code stub
    X86Stub,
    /// Direct call, every argument and the result at most 32 bits
    FastInt,
    /// Direct call, every argument and the result a 64-bit register
    FastLong,
    /// Prepared libffi call, scalar arguments without converters
    FastNumeric,
    /// Prepared libffi call with buffers, converters and variadics
    Buffer,
}

impl Strategy {
    pub const ORDER: [Strategy; 5] = [
        Strategy::X86Stub,
        Strategy::FastInt,
        Strategy::FastLong,
        Strategy::FastNumeric,
        Strategy::Buffer,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::X86Stub => "x86-stub",
            Self::FastInt => "fast-int",
            Self::FastLong => "fast-long",
            Self::FastNumeric => "fast-numeric",
            Self::Buffer => "buffer",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this strategy can generate a call path for `sig`
    pub fn is_supported(self, sig: &Signature, env: &StrategyEnv) -> bool {
        match self {
            Self::X86Stub => {
                env.enable_stubs
                    && env.stubs_supported
                    && plain_call(sig)
                    && sig.is_scalar_only()
                    && sig.converters_context_free()
                    && fits_registers(&sig.arg_classes())
            }
            Self::FastInt => {
                env.enable_fast_paths
                    && plain_call(sig)
                    && !sig.has_converters()
                    && sig.params.len() <= MAX_FAST_ARITY
                    && sig
                        .params
                        .iter()
                        .all(|p| is_integer(&p.kind) && fits_int(p.native, env.model))
                    && (sig.result.native == NativeType::Void
                        || (sig.result.native.is_integral() && fits_int(sig.result.native, env.model)))
            }
            Self::FastLong => {
                env.enable_fast_paths
                    && env.model.address_size == 8
                    && cfg!(target_pointer_width = "64")
                    && plain_call(sig)
                    && !sig.has_converters()
                    && sig.params.len() <= MAX_FAST_ARITY
                    && sig.params.iter().all(|p| is_integer(&p.kind))
                    && (sig.result.native == NativeType::Void || sig.result.native.is_integral())
            }
            Self::FastNumeric => {
                env.enable_fast_paths
                    && !sig.variadic
                    && !sig.has_converters()
                    && sig.is_scalar_only()
            }
            Self::Buffer => true,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Switches and target facts consulted by the predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyEnv {
    pub model: DataModel,
    pub enable_stubs: bool,
    pub enable_fast_paths: bool,
    pub stubs_supported: bool,
}

impl StrategyEnv {
    pub fn new(model: DataModel, enable_stubs: bool, enable_fast_paths: bool) -> Self {
        Self {
            model,
            enable_stubs,
            enable_fast_paths,
            stubs_supported: stubs_supported() && model == DataModel::host(),
        }
    }
}

/// First strategy in priority order accepting the signature
pub fn select(sig: &Signature, env: &StrategyEnv) -> Result<Strategy> {
    select_from(&Strategy::ORDER, sig, env)
}

/// First strategy of `order` accepting the signature
pub fn select_from(order: &[Strategy], sig: &Signature, env: &StrategyEnv) -> Result<Strategy> {
    order
        .iter()
        .copied()
        .find(|s| s.is_supported(sig, env))
        .ok_or_else(|| BindError::UnsupportedSignature(sig.describe()))
}

/// Fixed arity, platform convention
fn plain_call(sig: &Signature) -> bool {
    !sig.variadic && sig.convention == CallingConvention::Default
}

fn is_integer(kind: &ParamKind) -> bool {
    matches!(kind, ParamKind::Integer)
}

fn fits_int(native: NativeType, model: DataModel) -> bool {
    native.is_integral() && native.size(model) <= 4
}
