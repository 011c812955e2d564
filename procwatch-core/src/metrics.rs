use crate::error::SampleError;
use crate::process::ProcessHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Percent(f64),
    Bytes(u64),
    Count(u64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Percent(value) => write!(f, "{:.2}", value),
            AttributeValue::Bytes(value) | AttributeValue::Count(value) => write!(f, "{}", value),
        }
    }
}

/// Sampler for one metric family against one process.
///
/// Implementations keep whatever state they need between samples. The
/// [`kind`](AttributeDataSet::kind) key identifies the concrete type: a
/// [`ProcessDataSet`](crate::ProcessDataSet) holds at most one sampler per kind.
pub trait AttributeDataSet: Send {
    fn kind(&self) -> &'static str;

    /// Takes one sample of `target` at `now`.
    ///
    /// A target that exited yields [`SampleError::ProcessGone`]; that is an
    /// ordinary outcome, not a failure of the sampler.
    fn record(&mut self, target: &ProcessHandle, now: Instant) -> Result<(), SampleError>;

    fn last_value(&self) -> Option<AttributeValue>;
}

/// CPU utilization in percent of one core, derived from CPU time deltas.
///
/// The first sample has nothing to compare against and reports `0.0`.
pub struct CpuDataSet {
    cores: usize,
    previous: Option<(Duration, Instant)>,
    last: Option<f64>,
}

impl CpuDataSet {
    pub const KIND: &'static str = "cpu_percent";

    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_core_count(cores)
    }

    pub fn with_core_count(cores: usize) -> Self {
        Self {
            cores: cores.max(1),
            previous: None,
            last: None,
        }
    }

    fn percent(&self, cpu_time: Duration, now: Instant) -> f64 {
        let Some((previous_cpu, previous_at)) = self.previous else {
            return 0.0;
        };

        let elapsed = now.saturating_duration_since(previous_at);
        if elapsed.is_zero() {
            return 0.0;
        }

        let used = cpu_time.saturating_sub(previous_cpu);
        let percent = used.as_secs_f64() / elapsed.as_secs_f64() * 100.0;
        percent.clamp(0.0, self.cores as f64 * 100.0)
    }
}

impl Default for CpuDataSet {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeDataSet for CpuDataSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn record(&mut self, target: &ProcessHandle, now: Instant) -> Result<(), SampleError> {
        let cpu_time = target.cpu_time()?;
        let percent = self.percent(cpu_time, now);
        self.previous = Some((cpu_time, now));
        self.last = Some(percent);
        Ok(())
    }

    fn last_value(&self) -> Option<AttributeValue> {
        self.last.map(AttributeValue::Percent)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDataSet {
    last: Option<u64>,
}

impl MemoryDataSet {
    pub const KIND: &'static str = "memory_bytes";

    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeDataSet for MemoryDataSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn record(&mut self, target: &ProcessHandle, _now: Instant) -> Result<(), SampleError> {
        self.last = Some(target.memory_usage()?);
        Ok(())
    }

    fn last_value(&self) -> Option<AttributeValue> {
        self.last.map(AttributeValue::Bytes)
    }
}

#[derive(Debug, Default)]
pub struct VirtualMemoryDataSet {
    last: Option<u64>,
}

impl VirtualMemoryDataSet {
    pub const KIND: &'static str = "virtual_memory_bytes";

    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeDataSet for VirtualMemoryDataSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn record(&mut self, target: &ProcessHandle, _now: Instant) -> Result<(), SampleError> {
        self.last = Some(target.virtual_memory()?);
        Ok(())
    }

    fn last_value(&self) -> Option<AttributeValue> {
        self.last.map(AttributeValue::Bytes)
    }
}

#[derive(Debug, Default)]
pub struct ThreadCountDataSet {
    last: Option<u64>,
}

impl ThreadCountDataSet {
    pub const KIND: &'static str = "thread_count";

    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeDataSet for ThreadCountDataSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn record(&mut self, target: &ProcessHandle, _now: Instant) -> Result<(), SampleError> {
        self.last = Some(target.thread_count()?);
        Ok(())
    }

    fn last_value(&self) -> Option<AttributeValue> {
        self.last.map(AttributeValue::Count)
    }
}

pub type AttributeFactory = fn() -> Box<dyn AttributeDataSet>;

/// Known attribute data set types, keyed by [`AttributeDataSet::kind`].
#[derive(Default)]
pub struct AttributeRegistry {
    factories: BTreeMap<&'static str, AttributeFactory>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CpuDataSet::KIND, || Box::new(CpuDataSet::new()));
        registry.register(MemoryDataSet::KIND, || Box::new(MemoryDataSet::new()));
        registry.register(VirtualMemoryDataSet::KIND, || Box::new(VirtualMemoryDataSet::new()));
        registry.register(ThreadCountDataSet::KIND, || Box::new(ThreadCountDataSet::new()));
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: AttributeFactory) -> bool {
        if self.factories.contains_key(kind) {
            return false;
        }
        self.factories.insert(kind, factory);
        true
    }

    pub fn discover(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn instantiate(&self, kind: &str) -> Option<Box<dyn AttributeDataSet>> {
        self.factories.get(kind).map(|factory| factory())
    }

    /// One fresh instance of every registered type, in key order.
    pub fn instantiate_all(&self) -> Vec<Box<dyn AttributeDataSet>> {
        self.factories.values().map(|factory| factory()).collect()
    }
}
