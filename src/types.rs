use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Type tag reserved for analyses that run once, globally, after every input
/// id of their upstream types has finished.
pub const ACCUMULATOR: &str = "ACCUMULATOR";

/// Tag grouping compatible input ids (e.g. `SLICE`, `CONTIG`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputIdType(String);

impl InputIdType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn accumulator() -> Self {
        Self(ACCUMULATOR.to_string())
    }

    pub fn is_accumulator(&self) -> bool {
        self.0 == ACCUMULATOR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputIdType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unit of work context: the identifier an analysis runs on, plus its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputId {
    pub id: String,
    pub id_type: InputIdType,
}

impl InputId {
    pub fn new(id: impl Into<String>, id_type: impl Into<InputIdType>) -> Self {
        Self {
            id: id.into(),
            id_type: id_type.into(),
        }
    }

    /// The single global input id accumulator jobs run against.
    pub fn accumulator() -> Self {
        Self {
            id: ACCUMULATOR.to_string(),
            id_type: InputIdType::accumulator(),
        }
    }

    pub fn is_accumulator(&self) -> bool {
        self.id_type.is_accumulator()
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.id_type)
    }
}

/// How jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Hand jobs to the batch backend and poll for their outcome later.
    Batch,
    /// Run each job to completion inside the scheduler process.
    Local,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Batch
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "batch" => Ok(ExecutionMode::Batch),
            "local" => Ok(ExecutionMode::Local),
            other => Err(format!(
                "invalid execution mode: {other} (expected \"batch\" or \"local\")"
            )),
        }
    }
}

/// Parse durations like `"500ms"`, `"30s"`, `"5m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}
