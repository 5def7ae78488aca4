// src/resources.rs
//
// =============================================================================
// GRIDMASTER: RESOURCE QUANTITIES
// =============================================================================
//
// Pure functions over the string quantities jobs are submitted with.
//
// Responsibilities:
// 1. Parse CPU requests ("4", "4000m") into core counts.
// 2. Parse memory requests ("16Gi", "2G", raw bytes) into MB.
// 3. Decide whether a request fits a node's advertised capacity.
//
// No state lives here. Parsing happens at scheduling time so a job with a
// bad quantity is rejected by the matcher, not by the submission endpoint.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuantityError {
    #[error("cannot parse CPU quantity {0:?}")]
    Cpu(String),
    #[error("cannot parse memory quantity {0:?}")]
    Memory(String),
    #[error("unknown memory unit {unit:?} in {raw:?}")]
    Unit { raw: String, unit: String },
}

// ============================================================================
// 1. PARSERS
// ============================================================================

/// Parse a CPU string into a number of cores.
///
/// "4" means 4 cores, "4000m" means 4 cores via millicores.
pub fn parse_cpu(cpu: &str) -> Result<f64, QuantityError> {
    let cpu = cpu.trim();
    if let Some(millis) = cpu.strip_suffix('m') {
        let value: f64 = millis
            .parse()
            .map_err(|_| QuantityError::Cpu(cpu.to_string()))?;
        return Ok(value / 1000.0);
    }
    cpu.parse().map_err(|_| QuantityError::Cpu(cpu.to_string()))
}

static MEMORY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([A-Za-z]*)$").expect("memory quantity pattern"));

/// Parse a memory string into megabytes, floored.
///
/// Binary units (Ki/Mi/Gi/Ti) and decimal units (K/M/G/T) are both
/// accepted; a bare number is bytes.
pub fn parse_memory(mem: &str) -> Result<i64, QuantityError> {
    let mem = mem.trim();
    let caps = MEMORY_PATTERN
        .captures(mem)
        .ok_or_else(|| QuantityError::Memory(mem.to_string()))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| QuantityError::Memory(mem.to_string()))?;

    let multiplier = match &caps[2] {
        "" => 1.0 / (1024.0 * 1024.0), // bytes
        "Ki" => 1.0 / 1024.0,
        "Mi" => 1.0,
        "Gi" => 1024.0,
        "Ti" => 1024.0 * 1024.0,
        "K" => 1.0 / 1000.0,
        "M" => 1.0,
        "G" => 1000.0,
        "T" => 1000.0 * 1000.0,
        unit => {
            return Err(QuantityError::Unit {
                raw: mem.to_string(),
                unit: unit.to_string(),
            })
        }
    };

    Ok((value * multiplier) as i64)
}

// ============================================================================
// 2. FIT CHECK
// ============================================================================

/// Check whether a job's requirements fit in the available capacity.
///
/// Checks CPU, then memory, then GPU, and reports the first failure.
/// Comparisons are strict: a request exactly equal to the available
/// capacity fits.
pub fn check_resources_fit(
    required_cpu: &str,
    required_memory: &str,
    required_gpu: u32,
    available_cpu_cores: f64,
    available_memory_mb: i64,
    available_gpu: i64,
) -> Result<(bool, String), QuantityError> {
    let cpu_needed = parse_cpu(required_cpu)?;
    let mem_needed = parse_memory(required_memory)?;

    if cpu_needed > available_cpu_cores {
        return Ok((
            false,
            format!("CPU: need {}, have {}", cpu_needed, available_cpu_cores),
        ));
    }
    if mem_needed > available_memory_mb {
        return Ok((
            false,
            format!(
                "Memory: need {}MB, have {}MB",
                mem_needed, available_memory_mb
            ),
        ));
    }
    if i64::from(required_gpu) > available_gpu {
        return Ok((
            false,
            format!("GPU: need {}, have {}", required_gpu, available_gpu),
        ));
    }

    Ok((true, "ok".to_string()))
}
