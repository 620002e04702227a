// Resource module - per-process metrics catalogue, time series and sampling

mod holder;
mod sampler;
mod source;

pub use holder::{DataTimestamp, ResourceHolder};
pub use sampler::{cpu_percent, ResourceSampler};
pub use source::{MetricsSource, SystemMetrics};

use crate::error::{OverseerError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Metrics the sampler knows how to measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Resident memory in bytes
    MemoryUsed,
    /// CPU usage since the previous sample, in percent of one core
    CpuPercent,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::MemoryUsed, Resource::CpuPercent];

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim() {
            "memory_used" => Ok(Resource::MemoryUsed),
            "cpu_percent" => Ok(Resource::CpuPercent),
            other => Err(OverseerError::UnknownResource(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Resource::MemoryUsed => "memory_used",
            Resource::CpuPercent => "cpu_percent",
        }
    }

    /// Parse an amount literal in this resource's unit convention
    pub fn parse_amount(self, literal: &str) -> std::result::Result<Amount, String> {
        let literal = literal.trim();
        match self {
            Resource::MemoryUsed => parse_bytes(literal).map(Amount::Integer),
            Resource::CpuPercent => literal
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Amount::Float)
                .ok_or_else(|| format!("'{}' is not a decimal percentage", literal)),
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `<integer><kb|mb|gb>` scaled to bytes
fn parse_bytes(literal: &str) -> std::result::Result<u64, String> {
    if literal.len() < 3 || !literal.is_char_boundary(literal.len() - 2) {
        return Err(format!("'{}' is missing a kb/mb/gb suffix", literal));
    }

    let (digits, unit) = literal.split_at(literal.len() - 2);
    let scale = match unit.to_ascii_lowercase().as_str() {
        "kb" => KB,
        "mb" => MB,
        "gb" => GB,
        _ => return Err(format!("'{}' has an unknown unit suffix '{}'", literal, unit)),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not an integer amount", digits))?;

    value
        .checked_mul(scale)
        .ok_or_else(|| format!("'{}' is too large", literal))
}

/// A measured value or threshold, typed by the resource it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Integer(u64),
    Float(f64),
}

impl Amount {
    pub fn as_f64(self) -> f64 {
        match self {
            Amount::Integer(v) => v as f64,
            Amount::Float(v) => v,
        }
    }

    /// Compare two amounts; mixed kinds compare as floats
    pub fn compare(self, other: Amount) -> Option<Ordering> {
        match (self, other) {
            (Amount::Integer(a), Amount::Integer(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Amount::Integer(v) => write!(f, "{}", v),
            Amount::Float(v) => write!(f, "{:.2}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        for resource in Resource::ALL {
            assert_eq!(Resource::from_name(resource.name()).unwrap(), resource);
        }
        assert!(matches!(
            Resource::from_name("disk_used"),
            Err(OverseerError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_parse_memory_amounts() {
        let memory = Resource::MemoryUsed;
        assert_eq!(memory.parse_amount("512kb").unwrap(), Amount::Integer(512 * 1024));
        assert_eq!(memory.parse_amount("10mb").unwrap(), Amount::Integer(10 * 1024 * 1024));
        assert_eq!(
            memory.parse_amount("2gb").unwrap(),
            Amount::Integer(2 * 1024 * 1024 * 1024)
        );
        assert_eq!(memory.parse_amount("3MB").unwrap(), Amount::Integer(3 * MB));
    }

    #[test]
    fn test_parse_memory_errors() {
        let memory = Resource::MemoryUsed;
        assert!(memory.parse_amount("2048").is_err());
        assert!(memory.parse_amount("2tb").is_err());
        assert!(memory.parse_amount("1.5gb").is_err());
        assert!(memory.parse_amount("gb").is_err());
        assert!(memory.parse_amount("").is_err());
    }

    #[test]
    fn test_parse_cpu_amounts() {
        let cpu = Resource::CpuPercent;
        assert_eq!(cpu.parse_amount("80").unwrap(), Amount::Float(80.0));
        assert_eq!(cpu.parse_amount(" 12.5 ").unwrap(), Amount::Float(12.5));
        assert!(cpu.parse_amount("80%").is_err());
        assert!(cpu.parse_amount("NaN").is_err());
    }

    #[test]
    fn test_amount_compare() {
        assert_eq!(
            Amount::Integer(2).compare(Amount::Integer(3)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Amount::Float(50.0).compare(Amount::Integer(50)),
            Some(Ordering::Equal)
        );
    }
}
