//! Library binding - declarations to invokers
//!
//! Binding never fails as a whole. Each function is resolved on its own
//! (symbol, signature, strategy); a function that cannot be bound becomes a
//! failing entry point replaying its construction error. Stub-strategy
//! functions of one bind pass share a single page block.

use super::cache::DispatchCache;
use super::variable::NativeVariable;
use crate::compiler::{assemble_call_stub, CompiledStub, StubCompiler};
use crate::convert::{ConverterPipeline, TypeMapper};
use crate::error::{BindError, Result};
use crate::invoke::{
    select, select_from, FunctionDecl, InterfaceDecl, Invoker, Signature, SignatureContext,
    Strategy, StrategyEnv,
};
use crate::library::SymbolLookup;
use crate::logging::{log_binding_failure, log_strategy_selected, perf};
use crate::runtime::Runtime;
use crate::types::{CallingConvention, Value};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Maps declared function names to symbol names
pub trait FunctionMapper: Send + Sync {
    fn map_name(&self, name: &str) -> String;
}

impl<F> FunctionMapper for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn map_name(&self, name: &str) -> String {
        self(name)
    }
}

/// Declared names are symbol names
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl FunctionMapper for IdentityMapper {
    fn map_name(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Per-library binding options
#[derive(Clone)]
pub struct LibraryOptions {
    pub function_mapper: Arc<dyn FunctionMapper>,
    pub type_mapper: Option<Arc<dyn TypeMapper>>,
    pub convention: CallingConvention,
    /// Overrides the runtime's save-errors default
    pub save_error: Option<bool>,
    /// Serialise every call into the library
    pub synchronized: bool,
    /// Never use generated stubs for this library
    pub no_stubs: bool,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            function_mapper: Arc::new(IdentityMapper),
            type_mapper: None,
            convention: CallingConvention::Default,
            save_error: None,
            synchronized: false,
            no_stubs: false,
        }
    }
}

impl LibraryOptions {
    pub fn function_mapper(mut self, mapper: Arc<dyn FunctionMapper>) -> Self {
        self.function_mapper = mapper;
        self
    }

    pub fn type_mapper(mut self, mapper: Arc<dyn TypeMapper>) -> Self {
        self.type_mapper = Some(mapper);
        self
    }

    pub fn convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn save_error(mut self, save: bool) -> Self {
        self.save_error = Some(save);
        self
    }

    pub fn synchronized(mut self) -> Self {
        self.synchronized = true;
        self
    }

    pub fn no_stubs(mut self) -> Self {
        self.no_stubs = true;
        self
    }
}

/// Function resolved up to strategy selection
struct Prepared {
    sig: Arc<Signature>,
    function: usize,
    strategy: Strategy,
}

/// Builds invokers for one library
pub struct LibraryBinder {
    runtime: Arc<Runtime>,
    lookup: Arc<dyn SymbolLookup>,
    options: LibraryOptions,
    pipeline: ConverterPipeline,
    env: StrategyEnv,
    stubs: StubCompiler,
    lock: Option<Arc<Mutex<()>>>,
}

impl LibraryBinder {
    pub fn new(runtime: Arc<Runtime>, lookup: Arc<dyn SymbolLookup>, options: LibraryOptions) -> Self {
        let pipeline = ConverterPipeline::new(options.type_mapper.clone());
        let env = runtime.strategy_env(&options);
        let stubs = StubCompiler::new(Arc::clone(runtime.allocator()));
        let lock = options.synchronized.then(|| Arc::new(Mutex::new(())));
        Self {
            runtime,
            lookup,
            options,
            pipeline,
            env,
            stubs,
            lock,
        }
    }

    pub fn strategy_env(&self) -> &StrategyEnv {
        &self.env
    }

    fn context(&self) -> SignatureContext<'_> {
        SignatureContext {
            catalog: self.runtime.catalog(),
            pipeline: &self.pipeline,
            closures: self.runtime.closures(),
            default_encoding: self.runtime.default_encoding(),
            default_convention: self.options.convention,
            save_error_default: self
                .options
                .save_error
                .unwrap_or(self.runtime.config().save_errors_by_default),
        }
    }

    fn prepare(&self, decl: &FunctionDecl) -> Result<Prepared> {
        let symbol = self.options.function_mapper.map_name(&decl.name);
        let function = self.lookup.lookup(&symbol)?;
        let sig = Signature::build(decl, &self.context())?;
        let strategy = select(&sig, &self.env)?;
        Ok(Prepared {
            sig: Arc::new(sig),
            function,
            strategy,
        })
    }

    fn lock(&self) -> Option<Arc<Mutex<()>>> {
        self.lock.clone()
    }

    /// Invoker for a non-stub strategy, falling back to the next strategy
    /// when the stub assembler declines the signature
    fn build_plain(&self, prepared: Prepared) -> Result<Invoker> {
        let strategy = match prepared.strategy {
            Strategy::X86Stub => select_from(&Strategy::ORDER[1..], &prepared.sig, &self.env)?,
            other => other,
        };
        Invoker::build(prepared.sig, prepared.function, strategy, self.lock())
    }

    fn assemble(&self, prepared: &Prepared) -> Option<CompiledStub> {
        let sig = &prepared.sig;
        assemble_call_stub(prepared.function, &sig.arg_classes(), sig.result.native, sig.model).map(
            |code| CompiledStub {
                name: Arc::clone(&sig.name),
                signature: sig.describe(),
                code,
            },
        )
    }

    /// Bind a single function with its own stub block when it needs one
    pub fn bind_function(&self, decl: &FunctionDecl) -> Invoker {
        let invoker = match self.prepare(decl) {
            Ok(prepared) if prepared.strategy == Strategy::X86Stub => match self.assemble(&prepared) {
                Some(stub) => match self.stubs.attach(std::slice::from_ref(&stub)) {
                    Ok(attached) => match attached.stubs.first() {
                        Some(installed) => Ok(Invoker::with_stub(
                            prepared.sig,
                            prepared.function,
                            installed,
                            Arc::clone(&attached.block),
                            self.lock(),
                        )),
                        None => self.build_plain(prepared),
                    },
                    Err(e) => Err(e),
                },
                None => self.build_plain(prepared),
            },
            Ok(prepared) => self.build_plain(prepared),
            Err(e) => Err(e),
        };
        self.finish(&decl.name, invoker)
    }

    fn finish(&self, name: &Arc<str>, invoker: Result<Invoker>) -> Invoker {
        match invoker {
            Ok(invoker) => {
                if let Some(strategy) = invoker.strategy() {
                    log_strategy_selected(name, strategy.name());
                }
                invoker
            }
            Err(e) => {
                log_binding_failure(name, &e.to_string());
                Invoker::failing(Arc::clone(name), e)
            }
        }
    }

    /// Bind every declaration of `interface`
    pub fn bind(self, interface: &InterfaceDecl) -> LibraryBinding {
        let _timer = perf::track("bind_library");
        let cache = DispatchCache::new();
        let mut stubbed: Vec<(Prepared, CompiledStub)> = Vec::new();

        for decl in &interface.functions {
            match self.prepare(decl) {
                Ok(prepared) if prepared.strategy == Strategy::X86Stub => match self.assemble(&prepared) {
                    Some(stub) => stubbed.push((prepared, stub)),
                    None => {
                        let invoker = self.build_plain(prepared);
                        cache.insert(&decl.name, self.finish(&decl.name, invoker));
                    }
                },
                prepared => {
                    let invoker = prepared.and_then(|p| self.build_plain(p));
                    cache.insert(&decl.name, self.finish(&decl.name, invoker));
                }
            }
        }

        if !stubbed.is_empty() {
            let code: Vec<CompiledStub> = stubbed.iter().map(|(_, stub)| stub.clone()).collect();
            match self.stubs.attach(&code) {
                Ok(attached) => {
                    debug!(
                        stubs = attached.stubs.len(),
                        pages = attached.block.pages(),
                        "Stub block attached"
                    );
                    for ((prepared, _), installed) in stubbed.into_iter().zip(&attached.stubs) {
                        let name = Arc::clone(&prepared.sig.name);
                        let invoker = Invoker::with_stub(
                            prepared.sig,
                            prepared.function,
                            installed,
                            Arc::clone(&attached.block),
                            self.lock(),
                        );
                        cache.insert(&name, self.finish(&name, Ok(invoker)));
                    }
                }
                Err(e) => {
                    for (prepared, _) in stubbed {
                        let name = Arc::clone(&prepared.sig.name);
                        cache.insert(&name, self.finish(&name, Err(e.clone())));
                    }
                }
            }
        }

        let variables = DashMap::new();
        for decl in &interface.variables {
            let variable = NativeVariable::bind(decl, &*self.lookup, self.runtime.catalog());
            if let Err(e) = variable.address() {
                log_binding_failure(&decl.name, &e.to_string());
            }
            variables.insert(Arc::clone(&decl.name), Arc::new(variable));
        }

        LibraryBinding {
            binder: self,
            cache,
            variables,
        }
    }
}

/// Bound library: invokers and variable accessors by declared name
pub struct LibraryBinding {
    binder: LibraryBinder,
    cache: DispatchCache,
    variables: DashMap<Arc<str>, Arc<NativeVariable>>,
}

impl LibraryBinding {
    /// Call a bound function by declared name
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.function(name)
            .ok_or_else(|| BindError::SymbolNotFound(name.to_string()))?
            .invoke(args)
    }

    pub fn function(&self, name: &str) -> Option<Arc<Invoker>> {
        self.cache.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<Arc<NativeVariable>> {
        self.variables.get(name).map(|v| Arc::clone(v.value()))
    }

    /// Bind one more function; the first binding of a name wins
    pub fn bind_function(&self, decl: &FunctionDecl) -> Arc<Invoker> {
        self.cache
            .get_or_insert_with(&decl.name, || self.binder.bind_function(decl))
    }

    pub fn functions(&self) -> usize {
        self.cache.len()
    }

    pub fn strategy_env(&self) -> &StrategyEnv {
        self.binder.strategy_env()
    }
}

impl std::fmt::Debug for LibraryBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryBinding")
            .field("functions", &self.cache.len())
            .field("variables", &self.variables.len())
            .finish()
    }
}
