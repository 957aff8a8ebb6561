use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::val::{BError, BValue, ErrorFrame};

use super::{CallableUnit, RegisterFile, VmError, WorkerInfo};

pub type ContextId = u64;

/// Lifecycle of one execution context.
///
/// `Created → Runnable → Running → {Completed | Failed}`. A running context that starts a
/// blocking invocation moves to `WaitingForResponse` and back to `Running` once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Runnable,
    Running,
    WaitingForResponse,
    Completed,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Failed)
    }

    fn can_move_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Created, Runnable)
                | (Runnable, Running)
                | (Running, WaitingForResponse)
                | (WaitingForResponse, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// Arena bookkeeping for one context: the tree edge and the current state.
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub parent: Option<ContextId>,
    pub state: WorkerState,
    pub label: Arc<str>,
}

/// Every live execution context, keyed by id. Parent links are ids, not ownership.
#[derive(Debug)]
pub struct ContextArena {
    records: DashMap<ContextId, ContextRecord>,
    next_id: AtomicU64,
}

impl Default for ContextArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextArena {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, parent: Option<ContextId>, state: WorkerState, label: Arc<str>) -> ContextId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.insert(id, ContextRecord { parent, state, label });
        id
    }

    pub fn state(&self, id: ContextId) -> Option<WorkerState> {
        self.records.get(&id).map(|r| r.state)
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.records.get(&id).and_then(|r| r.parent)
    }

    pub fn record(&self, id: ContextId) -> Option<ContextRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    /// Ids from `id` up to its outermost live ancestor, `id` first.
    pub fn ancestry(&self, id: ContextId) -> Vec<ContextId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !self.records.contains_key(&current) {
                break;
            }
            chain.push(current);
            cursor = self.parent(current);
        }
        chain
    }

    pub fn transition(&self, id: ContextId, next: WorkerState) -> Result<WorkerState, VmError> {
        let mut entry = self.records.get_mut(&id).ok_or(VmError::InvalidTransition {
            id,
            from: None,
            to: next,
        })?;
        let prev = entry.state;
        if !prev.can_move_to(next) {
            return Err(VmError::InvalidTransition {
                id,
                from: Some(prev),
                to: next,
            });
        }
        entry.state = next;
        trace!(target: "bvm::vm::context", id, from = ?prev, to = ?next, "context.transition");
        Ok(prev)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn release(&self, id: ContextId) {
        self.records.remove(&id);
    }
}

/// Properties shared by every context of one invocation tree.
///
/// Access is synchronized per key; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct GlobalProps {
    inner: Arc<DashMap<String, BValue>>,
}

impl GlobalProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<BValue> {
        self.inner.get(key).map(|v| v.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: BValue) -> Option<BValue> {
        self.inner.insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<BValue> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether two handles refer to the same map.
    pub fn same_map(&self, other: &GlobalProps) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// One worker activation, or a host-side root.
///
/// Owns its register files exclusively. Dropping the context releases its arena record.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    parent: Option<ContextId>,
    arena: Arc<ContextArena>,
    unit: Option<Arc<CallableUnit>>,
    worker: Option<Arc<WorkerInfo>>,
    props: GlobalProps,
    error: Option<BError>,
    run_in_caller: bool,
    /// Worker registers; parameters occupy the low slots of each bank.
    pub local: RegisterFile,
    /// Return registers, laid out by the unit's return signature.
    pub result: RegisterFile,
}

impl ExecutionContext {
    /// A throwaway root that is already running on the host's path.
    pub fn root(arena: Arc<ContextArena>, props: GlobalProps) -> Self {
        let id = arena.register(None, WorkerState::Running, Arc::from("<root>"));
        Self {
            id,
            parent: None,
            arena,
            unit: None,
            worker: None,
            props,
            error: None,
            run_in_caller: true,
            local: RegisterFile::default(),
            result: RegisterFile::default(),
        }
    }

    /// A running child of `parent` that shares its properties but owns fresh registers.
    pub fn child_root(parent: &ExecutionContext) -> Self {
        let arena = parent.arena.clone();
        let id = arena.register(Some(parent.id), WorkerState::Running, Arc::from("<root>"));
        Self {
            id,
            parent: Some(parent.id),
            arena,
            unit: None,
            worker: None,
            props: parent.props.clone(),
            error: None,
            run_in_caller: true,
            local: RegisterFile::default(),
            result: RegisterFile::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn for_worker(
        arena: Arc<ContextArena>,
        parent: ContextId,
        unit: Arc<CallableUnit>,
        worker: Arc<WorkerInfo>,
        local: RegisterFile,
        result: RegisterFile,
        props: GlobalProps,
        run_in_caller: bool,
    ) -> Self {
        let label: Arc<str> = Arc::from(format!("{}({})", unit.qualified_name(), worker.name()));
        let id = arena.register(Some(parent), WorkerState::Created, label);
        Self {
            id,
            parent: Some(parent),
            arena,
            unit: Some(unit),
            worker: Some(worker),
            props,
            error: None,
            run_in_caller,
            local,
            result,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn state(&self) -> Option<WorkerState> {
        self.arena.state(self.id)
    }

    pub fn unit(&self) -> Option<&Arc<CallableUnit>> {
        self.unit.as_ref()
    }

    pub fn worker(&self) -> Option<&Arc<WorkerInfo>> {
        self.worker.as_ref()
    }

    pub fn props(&self) -> &GlobalProps {
        &self.props
    }

    pub fn runs_in_caller(&self) -> bool {
        self.run_in_caller
    }

    pub fn error(&self) -> Option<&BError> {
        self.error.as_ref()
    }

    /// Put `err` in the error slot, replacing any earlier one.
    pub fn raise(&mut self, err: BError) {
        self.error = Some(err);
    }

    pub fn take_error(&mut self) -> Option<BError> {
        self.error.take()
    }

    pub(crate) fn arena(&self) -> &Arc<ContextArena> {
        &self.arena
    }

    pub(crate) fn transition(&self, next: WorkerState) -> Result<WorkerState, VmError> {
        self.arena.transition(self.id, next)
    }

    /// Frame describing this context in an error trail.
    pub fn error_frame(&self) -> Option<ErrorFrame> {
        let unit = self.unit.as_ref()?;
        let worker = self.worker.as_ref()?;
        Some(ErrorFrame {
            package: unit.package().clone(),
            unit: unit.name().clone(),
            worker: worker.name().clone(),
        })
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.arena.release(self.id);
    }
}
