//! Executable loader: validates WebAssembly payloads, instantiates them in an
//! isolated interpreter store, and caches the result by qualifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use wasmi::core::{ValueType, F32, F64};
use wasmi::{Engine, ExternType, Instance, Linker, Module, Store};

use crate::error::ExecutionError;
use crate::task::{Value, ValueKind};

/// Leading bytes every payload must start with (`\0asm`).
pub const PAYLOAD_SIGNATURE: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Signature plus the 4-byte format version.
pub const MIN_HEADER_LEN: usize = 8;

/// Check payload size and signature without instantiating anything.
pub fn validate_payload(payload: &[u8]) -> Result<(), ExecutionError> {
    if payload.len() < MIN_HEADER_LEN {
        return Err(ExecutionError::PayloadFormat(format!(
            "payload too small: {} bytes, minimum is {}",
            payload.len(),
            MIN_HEADER_LEN
        )));
    }
    if payload[..4] != PAYLOAD_SIGNATURE {
        return Err(ExecutionError::PayloadFormat(
            "invalid payload: missing \\0asm signature".to_string(),
        ));
    }
    Ok(())
}

/// Name and numeric signature of an exported function, recorded at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub params: Vec<ValueKind>,
    pub results: Vec<ValueKind>,
}

impl EntryPoint {
    fn accepts(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(kind, arg)| *kind == arg.kind())
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, join_kinds(&self.params))?;
        if !self.results.is_empty() {
            write!(f, " -> ({})", join_kinds(&self.results))?;
        }
        Ok(())
    }
}

fn join_kinds(kinds: &[ValueKind]) -> String {
    kinds
        .iter()
        .map(ValueKind::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn kind_of(ty: &ValueType) -> Option<ValueKind> {
    match ty {
        ValueType::I32 => Some(ValueKind::I32),
        ValueType::I64 => Some(ValueKind::I64),
        ValueType::F32 => Some(ValueKind::F32),
        ValueType::F64 => Some(ValueKind::F64),
        ValueType::FuncRef | ValueType::ExternRef => None,
    }
}

fn to_wasm(value: &Value) -> Option<wasmi::Value> {
    match value {
        Value::I32(v) => Some(wasmi::Value::I32(*v)),
        Value::I64(v) => Some(wasmi::Value::I64(*v)),
        Value::F32(v) => Some(wasmi::Value::F32(F32::from_float(*v))),
        Value::F64(v) => Some(wasmi::Value::F64(F64::from_float(*v))),
        _ => None,
    }
}

fn zero_of(kind: ValueKind) -> wasmi::Value {
    match kind {
        ValueKind::I64 => wasmi::Value::I64(0),
        ValueKind::F32 => wasmi::Value::F32(F32::from_float(0.0)),
        ValueKind::F64 => wasmi::Value::F64(F64::from_float(0.0)),
        _ => wasmi::Value::I32(0),
    }
}

fn from_wasm(value: &wasmi::Value) -> Result<Value, ExecutionError> {
    match value {
        wasmi::Value::I32(v) => Ok(Value::I32(*v)),
        wasmi::Value::I64(v) => Ok(Value::I64(*v)),
        wasmi::Value::F32(v) => Ok(Value::F32(v.to_float())),
        wasmi::Value::F64(v) => Ok(Value::F64(v.to_float())),
        other => Err(ExecutionError::ResultEncode(format!(
            "unsupported return value {:?}",
            other
        ))),
    }
}

/// A validated, instantiated payload.
///
/// All tasks that reference the same qualifier share one instance, including
/// its globals and linear memory. Calls into the instance are serialized.
pub struct LoadedUnit {
    qualifier: String,
    content_tag: String,
    entry_points: HashMap<String, EntryPoint>,
    instance: Instance,
    store: Mutex<Store<()>>,
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("qualifier", &self.qualifier)
            .field("content_tag", &self.content_tag)
            .field("entry_points", &self.entry_points.len())
            .finish()
    }
}

impl LoadedUnit {
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Content tag of the payload this unit was built from
    pub fn content_tag(&self) -> &str {
        &self.content_tag
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.get(name)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entry_points.values()
    }

    /// Find the entry point named `name` whose parameter kinds exactly match `args`.
    pub fn resolve(&self, name: &str, args: &[Value]) -> Result<&EntryPoint, ExecutionError> {
        let entry = self.entry_points.get(name).ok_or_else(|| {
            ExecutionError::EntryPointResolution(format!(
                "no entry point named `{}` in `{}`",
                name, self.qualifier
            ))
        })?;
        if !entry.accepts(args) {
            let given: Vec<ValueKind> = args.iter().map(Value::kind).collect();
            return Err(ExecutionError::EntryPointResolution(format!(
                "`{}` does not accept ({})",
                entry,
                join_kinds(&given)
            )));
        }
        Ok(entry)
    }

    /// Call a resolved entry point. Zero results become `Unit`, several become a `List`.
    pub fn invoke(&self, entry: &EntryPoint, args: &[Value]) -> Result<Value, ExecutionError> {
        let inputs = args
            .iter()
            .map(to_wasm)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                ExecutionError::Invocation(format!("arguments do not fit `{}`", entry))
            })?;
        let mut outputs: Vec<wasmi::Value> = entry.results.iter().map(|k| zero_of(*k)).collect();

        let mut store = self
            .store
            .lock()
            .map_err(|_| ExecutionError::Invocation("unit state is poisoned".to_string()))?;
        let func = self
            .instance
            .get_func(&*store, &entry.name)
            .ok_or_else(|| ExecutionError::Invocation(format!("export `{}` vanished", entry.name)))?;
        func.call(&mut *store, &inputs, &mut outputs)
            .map_err(|e| ExecutionError::Invocation(e.to_string()))?;
        drop(store);

        let mut values = outputs
            .iter()
            .map(from_wasm)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match values.len() {
            0 => Value::Unit,
            1 => values.remove(0),
            _ => Value::List(values),
        })
    }
}

/// Cache cell for one qualifier. `init` is held only by the thread
/// instantiating this qualifier; lookups of a filled cell never take it.
#[derive(Default)]
struct UnitSlot {
    unit: OnceLock<Arc<LoadedUnit>>,
    init: Mutex<()>,
}

/// Validates and caches loaded units, one per qualifier for the life of the process.
///
/// The cache key is the qualifier alone: a second, different payload submitted
/// under an already-loaded qualifier is never loaded.
pub struct ExecutableLoader {
    engine: Engine,
    units: DashMap<String, Arc<UnitSlot>>,
    loads: AtomicUsize,
}

impl Default for ExecutableLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableLoader {
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
            units: DashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the cached unit for `qualifier`, loading `payload` if it has not been seen.
    ///
    /// Concurrent first loads of one qualifier instantiate it only once. The
    /// map itself is never locked across instantiation, so a slow payload only
    /// delays callers waiting on the same qualifier. A failed load leaves the
    /// slot empty and the next call tries again.
    pub fn load(&self, qualifier: &str, payload: &[u8]) -> Result<Arc<LoadedUnit>, ExecutionError> {
        let slot = self
            .units
            .entry(qualifier.to_string())
            .or_default()
            .value()
            .clone();

        if let Some(unit) = slot.unit.get() {
            tracing::debug!(qualifier, "Unit found in cache");
            return Ok(unit.clone());
        }

        let _init = slot.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(unit) = slot.unit.get() {
            return Ok(unit.clone());
        }
        let unit = Arc::new(self.instantiate(qualifier, payload)?);
        Ok(slot.unit.get_or_init(|| unit).clone())
    }

    pub fn is_cached(&self, qualifier: &str) -> bool {
        self.units
            .get(qualifier)
            .is_some_and(|slot| slot.unit.get().is_some())
    }

    /// Number of payloads that went through validation and instantiation
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    fn instantiate(&self, qualifier: &str, payload: &[u8]) -> Result<LoadedUnit, ExecutionError> {
        tracing::debug!(qualifier, bytes = payload.len(), "Loading payload");
        self.loads.fetch_add(1, Ordering::Relaxed);
        validate_payload(payload)?;

        let module = Module::new(&self.engine, payload)
            .map_err(|e| ExecutionError::LoadLinkage(e.to_string()))?;

        let entry_points: HashMap<String, EntryPoint> = module
            .exports()
            .filter_map(|export| {
                let ExternType::Func(func_ty) = export.ty() else {
                    return None;
                };
                let params = func_ty.params().iter().map(kind_of).collect::<Option<Vec<_>>>()?;
                let results = func_ty.results().iter().map(kind_of).collect::<Option<Vec<_>>>()?;
                Some(EntryPoint {
                    name: export.name().to_string(),
                    params,
                    results,
                })
            })
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        // No host functions are linked: a payload that imports anything fails here.
        let mut store = Store::new(&self.engine, ());
        let linker = <Linker<()>>::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| ExecutionError::LoadLinkage(e.to_string()))?
            .start(&mut store)
            .map_err(|e| ExecutionError::LoadLinkage(e.to_string()))?;

        tracing::info!(
            qualifier,
            entry_points = entry_points.len(),
            "Payload loaded and cached"
        );

        Ok(LoadedUnit {
            qualifier: qualifier.to_string(),
            content_tag: crate::task::content_tag(payload),
            entry_points,
            instance,
            store: Mutex::new(store),
        })
    }
}
