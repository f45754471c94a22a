//! Resolution of dotted alert-rule paths against one metrics snapshot
//!
//! Paths have the shape `type.field` or `type.object.field`:
//!
//! | path | value | current |
//! |---|---|---|
//! | `system.cpu_usage_percent` | CPU usage | `85.00%` |
//! | `system.memory_usage_percent` | RAM usage | `%` |
//! | `system.disk_usage_percent` | disk usage | `%` |
//! | `process.<name>.cpu_percent` | process CPU | `%` |
//! | `process.<name>.memory_mb` | resident memory | `MB` |
//! | `process.<name>.memory_percent` | memory share | `%` |
//! | `container.<name>.cpu_percent` / `memory_percent` | container usage | `%` |
//! | `container.<name>.status` | 1 if running else 0 | status label |
//! | `network.<port>.status` | 1 if LISTEN else 0 | state label |
//!
//! `system` paths take exactly two segments: `system.x.cpu_usage_percent`
//! is rejected as an invalid name rather than read with the middle segment
//! ignored. Likewise `process`, `container` and `network` need all three.
//!
//! Evaluation never fails loudly: anything that cannot be resolved comes
//! back as [`Evaluation::Unresolved`] and never triggers.

use std::fmt;
use std::str::FromStr;

use crate::MetricsSnapshot;
use crate::storage::schema::AlertRule;

/// Comparison operator of an alert rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Greater,
    Less,
    Equal,
    GreaterOrEqual,
    LessOrEqual,
    NotEqual,
}

impl FromStr for Condition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Condition::Greater),
            "<" => Ok(Condition::Less),
            "=" => Ok(Condition::Equal),
            ">=" => Ok(Condition::GreaterOrEqual),
            "<=" => Ok(Condition::LessOrEqual),
            "!=" => Ok(Condition::NotEqual),
            _ => Err(()),
        }
    }
}

impl Condition {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::Greater => value > threshold,
            Condition::Less => value < threshold,
            Condition::Equal => value == threshold,
            Condition::GreaterOrEqual => value >= threshold,
            Condition::LessOrEqual => value <= threshold,
            Condition::NotEqual => value != threshold,
        }
    }
}

/// Compare `value` against `threshold`; an unknown operator never triggers
pub fn compare(value: f64, condition: &str, threshold: f64) -> bool {
    condition
        .parse::<Condition>()
        .is_ok_and(|c| c.holds(value, threshold))
}

/// Why a rule path could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalFailure {
    InvalidMetricName,
    UnknownMetricType,
    UnknownSystemMetric,
    UnknownProcessMetric,
    UnknownContainerMetric,
    UnknownNetworkMetric,
    ProcessNotFound,
    ContainerNotFound,
    InvalidPort,
    PortNotFound,
    SystemMetricsMissing,
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EvalFailure::InvalidMetricName => "invalid metric name",
            EvalFailure::UnknownMetricType => "unknown metric type",
            EvalFailure::UnknownSystemMetric => "unknown system metric",
            EvalFailure::UnknownProcessMetric => "unknown process metric",
            EvalFailure::UnknownContainerMetric => "unknown container metric",
            EvalFailure::UnknownNetworkMetric => "unknown network metric",
            EvalFailure::ProcessNotFound => "process not found",
            EvalFailure::ContainerNotFound => "container not found",
            EvalFailure::InvalidPort => "invalid port",
            EvalFailure::PortNotFound => "port not found",
            EvalFailure::SystemMetricsMissing => "system metrics missing",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Path resolved; `current` is the humanized value used in messages
    Value { triggered: bool, current: String },
    Unresolved(EvalFailure),
}

impl Evaluation {
    pub fn triggered(&self) -> bool {
        matches!(self, Evaluation::Value { triggered: true, .. })
    }
}

/// A resolved metric: the number compared and its display form
struct Reading {
    value: f64,
    current: String,
}

impl Reading {
    fn percent(value: f64) -> Self {
        Self {
            value,
            current: format!("{value:.2}%"),
        }
    }

    fn megabytes(value: f64) -> Self {
        Self {
            value,
            current: format!("{value:.2}MB"),
        }
    }

    fn flag(on: bool, label: &str) -> Self {
        Self {
            value: if on { 1.0 } else { 0.0 },
            current: label.to_string(),
        }
    }
}

/// Evaluate one rule against a snapshot
///
/// The rule's `enabled` flag is not consulted here.
pub fn evaluate(snapshot: &MetricsSnapshot, rule: &AlertRule) -> Evaluation {
    match resolve(snapshot, &rule.metric_name) {
        Ok(reading) => Evaluation::Value {
            triggered: compare(reading.value, &rule.condition, rule.threshold_value),
            current: reading.current,
        },
        Err(failure) => Evaluation::Unresolved(failure),
    }
}

fn resolve(snapshot: &MetricsSnapshot, path: &str) -> Result<Reading, EvalFailure> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(EvalFailure::InvalidMetricName);
    }

    // the middle segment names the object, the last one the field
    let field = parts[parts.len() - 1];
    let object = if parts.len() == 3 { Some(parts[1]) } else { None };

    match (parts[0], object) {
        ("system", None) => resolve_system(snapshot, field),
        ("process", Some(name)) => resolve_process(snapshot, name, field),
        ("container", Some(name)) => resolve_container(snapshot, name, field),
        ("network", Some(port)) => resolve_network(snapshot, port, field),
        ("system" | "process" | "container" | "network", _) => Err(EvalFailure::InvalidMetricName),
        _ => Err(EvalFailure::UnknownMetricType),
    }
}

fn resolve_system(snapshot: &MetricsSnapshot, field: &str) -> Result<Reading, EvalFailure> {
    let system = snapshot
        .system
        .as_ref()
        .ok_or(EvalFailure::SystemMetricsMissing)?;

    match field {
        "cpu_usage_percent" => Ok(Reading::percent(system.cpu.usage_percent)),
        "memory_usage_percent" => Ok(Reading::percent(system.ram.usage_percent)),
        "disk_usage_percent" => Ok(Reading::percent(system.disk.usage_percent)),
        _ => Err(EvalFailure::UnknownSystemMetric),
    }
}

fn resolve_process(
    snapshot: &MetricsSnapshot,
    name: &str,
    field: &str,
) -> Result<Reading, EvalFailure> {
    let process = snapshot
        .processes
        .iter()
        .find(|p| p.name == name)
        .ok_or(EvalFailure::ProcessNotFound)?;

    match field {
        "cpu_percent" => Ok(Reading::percent(process.cpu_percent)),
        "memory_mb" => Ok(Reading::megabytes(process.memory_mb)),
        "memory_percent" => Ok(Reading::percent(process.memory_percent)),
        _ => Err(EvalFailure::UnknownProcessMetric),
    }
}

fn resolve_container(
    snapshot: &MetricsSnapshot,
    name: &str,
    field: &str,
) -> Result<Reading, EvalFailure> {
    let container = snapshot
        .containers
        .iter()
        .find(|c| c.name == name)
        .ok_or(EvalFailure::ContainerNotFound)?;

    match field {
        "cpu_percent" => Ok(Reading::percent(container.cpu_percent)),
        "memory_percent" => Ok(Reading::percent(container.memory_percent)),
        "status" => Ok(Reading::flag(
            container.status == "running",
            &container.status,
        )),
        _ => Err(EvalFailure::UnknownContainerMetric),
    }
}

fn resolve_network(
    snapshot: &MetricsSnapshot,
    port: &str,
    field: &str,
) -> Result<Reading, EvalFailure> {
    let port: u16 = port.parse().map_err(|_| EvalFailure::InvalidPort)?;

    let info = snapshot
        .ports
        .iter()
        .find(|p| p.port == port)
        .ok_or(EvalFailure::PortNotFound)?;

    match field {
        "status" => Ok(Reading::flag(info.state == "LISTEN", &info.state)),
        _ => Err(EvalFailure::UnknownNetworkMetric),
    }
}
