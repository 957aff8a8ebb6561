//! Read-only program metadata consumed by the invocation core.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::OnceCell;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::BType;

use super::{RegisterCounts, RegisterFile, RegisterLayout, VmError};

pub const DEFAULT_WORKER: &str = "default";

/// One concurrently schedulable body of a callable unit.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    name: Arc<str>,
    index: usize,
    locals: RegisterCounts,
}

impl WorkerInfo {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Position among the unit's workers; worker 0 runs on the caller's path.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn locals(&self) -> &RegisterCounts {
        &self.locals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Function,
    Action,
    Init,
}

/// A function-like entity with a declared signature and one or more workers.
#[derive(Debug)]
pub struct CallableUnit {
    package: Arc<str>,
    name: Arc<str>,
    kind: UnitKind,
    params: RegisterLayout,
    returns: RegisterLayout,
    workers: Vec<Arc<WorkerInfo>>,
}

impl CallableUnit {
    pub fn builder(package: &str, name: &str) -> CallableUnitBuilder {
        CallableUnitBuilder {
            package: Arc::from(package),
            name: Arc::from(name),
            kind: UnitKind::Function,
            params: Vec::new(),
            returns: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn package(&self) -> &Arc<str> {
        &self.package
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn params(&self) -> &RegisterLayout {
        &self.params
    }

    pub fn returns(&self) -> &RegisterLayout {
        &self.returns
    }

    /// Workers in scheduling order. Never empty: a unit without declared workers owns a
    /// single implicit default worker.
    pub fn workers(&self) -> &[Arc<WorkerInfo>] {
        &self.workers
    }

    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.package, self.name)
    }
}

pub struct CallableUnitBuilder {
    package: Arc<str>,
    name: Arc<str>,
    kind: UnitKind,
    params: Vec<BType>,
    returns: Vec<BType>,
    workers: Vec<(Arc<str>, RegisterCounts)>,
}

impl CallableUnitBuilder {
    pub fn kind(mut self, kind: UnitKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn param(mut self, ty: BType) -> Self {
        self.params.push(ty);
        self
    }

    pub fn params(mut self, tys: impl IntoIterator<Item = BType>) -> Self {
        self.params.extend(tys);
        self
    }

    pub fn returns(mut self, tys: impl IntoIterator<Item = BType>) -> Self {
        self.returns.extend(tys);
        self
    }

    /// Declare a worker with its local register needs (parameters are added on top when
    /// the declared locals are too small to hold them).
    pub fn worker(mut self, name: &str, locals: RegisterCounts) -> Self {
        self.workers.push((Arc::from(name), locals));
        self
    }

    pub fn build(self) -> Result<Arc<CallableUnit>, VmError> {
        let params = RegisterLayout::for_signature(&self.params)?;
        let returns = RegisterLayout::for_signature(&self.returns)?;
        let declared = if self.workers.is_empty() {
            vec![(Arc::from(DEFAULT_WORKER), *params.counts())]
        } else {
            self.workers
        };
        let workers = declared
            .into_iter()
            .enumerate()
            .map(|(index, (name, locals))| {
                Arc::new(WorkerInfo {
                    name,
                    index,
                    locals: locals.max(params.counts()),
                })
            })
            .collect();
        Ok(Arc::new(CallableUnit {
            package: self.package,
            name: self.name,
            kind: self.kind,
            params,
            returns,
            workers,
        }))
    }
}

/// Value of a resolved constant attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

/// Annotation attribute whose value names a package constant.
///
/// Clones share the resolution cell, so the holder of an attribute observes the value once
/// the constant's package has been initialized.
#[derive(Debug, Clone)]
pub struct ConstAttr {
    package: Arc<str>,
    name: Arc<str>,
    value: Arc<OnceCell<ConstValue>>,
}

impl ConstAttr {
    pub fn new(package: &str, name: &str) -> Self {
        Self {
            package: Arc::from(package),
            name: Arc::from(name),
            value: Arc::new(OnceCell::new()),
        }
    }

    pub fn package(&self) -> &Arc<str> {
        &self.package
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn value(&self) -> Option<&ConstValue> {
        self.value.get()
    }

    pub(crate) fn resolve(&self, value: ConstValue) {
        let _ = self.value.set(value);
    }
}

/// A package-level variable slot inside the program's global memory block.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub index: usize,
    pub ty: BType,
}

#[derive(Debug)]
pub struct PackageInfo {
    name: Arc<str>,
    init: Option<Arc<CallableUnit>>,
    functions: FastHashMap<String, Arc<CallableUnit>>,
    globals: FastHashMap<String, GlobalVar>,
    pending_constants: Mutex<Vec<ConstAttr>>,
}

impl PackageInfo {
    pub fn builder(name: &str) -> PackageBuilder {
        PackageBuilder {
            name: Arc::from(name),
            init: None,
            functions: fast_hash_map_new(),
            globals: fast_hash_map_new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn init_unit(&self) -> Option<&Arc<CallableUnit>> {
        self.init.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<&Arc<CallableUnit>> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<CallableUnit>> {
        self.functions.values()
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> impl Iterator<Item = (&String, &GlobalVar)> {
        self.globals.iter()
    }

    pub(crate) fn defer_constant(&self, attr: ConstAttr) {
        self.pending_constants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attr);
    }

    /// Remove and return every constant attribute still waiting for this package.
    pub(crate) fn take_pending_constants(&self) -> Vec<ConstAttr> {
        std::mem::take(&mut *self.pending_constants.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Put back constants taken by [`PackageInfo::take_pending_constants`] that could not be resolved.
    pub(crate) fn restore_pending_constants(&self, attrs: Vec<ConstAttr>) {
        let mut pending = self.pending_constants.lock().unwrap_or_else(PoisonError::into_inner);
        let later = std::mem::replace(&mut *pending, attrs);
        pending.extend(later);
    }

    pub fn pending_constant_count(&self) -> usize {
        self.pending_constants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct PackageBuilder {
    name: Arc<str>,
    init: Option<Arc<CallableUnit>>,
    functions: FastHashMap<String, Arc<CallableUnit>>,
    globals: FastHashMap<String, GlobalVar>,
}

impl PackageBuilder {
    pub fn init(mut self, unit: Arc<CallableUnit>) -> Self {
        self.init = Some(unit);
        self
    }

    pub fn function(mut self, unit: Arc<CallableUnit>) -> Self {
        self.functions.insert(unit.name().to_string(), unit);
        self
    }

    pub fn global(mut self, name: &str, index: usize, ty: BType) -> Self {
        self.globals.insert(name.to_string(), GlobalVar { index, ty });
        self
    }

    pub fn build(self) -> PackageInfo {
        PackageInfo {
            name: self.name,
            init: self.init,
            functions: self.functions,
            globals: self.globals,
            pending_constants: Mutex::new(Vec::new()),
        }
    }
}

/// Storage for package-level variables, shared by every context of a program.
#[derive(Debug)]
pub struct GlobalMemory {
    regs: RwLock<RegisterFile>,
}

impl GlobalMemory {
    pub fn new(counts: &RegisterCounts) -> Self {
        Self {
            regs: RwLock::new(RegisterFile::new(counts)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&RegisterFile) -> R) -> R {
        let guard = self.regs.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut RegisterFile) -> R) -> R {
        let mut guard = self.regs.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// A loaded program: packages by name plus the global memory block.
#[derive(Debug)]
pub struct Program {
    packages: FastHashMap<String, Arc<PackageInfo>>,
    globals: GlobalMemory,
}

impl Program {
    pub fn new(packages: impl IntoIterator<Item = PackageInfo>, globals: RegisterCounts) -> Self {
        let packages = packages
            .into_iter()
            .map(|pkg| (pkg.name().to_string(), Arc::new(pkg)))
            .collect();
        Self {
            packages,
            globals: GlobalMemory::new(&globals),
        }
    }

    pub fn package(&self, name: &str) -> Option<&Arc<PackageInfo>> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Arc<PackageInfo>> {
        self.packages.values()
    }

    pub fn globals(&self) -> &GlobalMemory {
        &self.globals
    }

    /// Register an attribute whose constant is only known once its package has run init.
    pub fn defer_constant(&self, attr: ConstAttr) -> Result<(), VmError> {
        let pkg = self
            .packages
            .get(attr.package().as_ref())
            .ok_or_else(|| VmError::PackageNotFound(attr.package().to_string()))?;
        pkg.defer_constant(attr);
        Ok(())
    }
}
