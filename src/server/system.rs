//! Host health reported by `/api/system`.

use super::handlers::{blocking, ApiError};
use super::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::path::Path;
use std::process::Command;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Filesystem usage of the volume holding the captures directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// Space taken by the captures themselves.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CapturesUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Response body of `/api/system`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub cpu_temperature: Option<f64>,
    pub captures_dir: String,
    pub captures: CapturesUsage,
    pub disk: Option<DiskUsage>,
    pub version: &'static str,
}

/// SoC temperature in degrees Celsius, if the platform exposes one.
pub fn cpu_temperature() -> Option<f64> {
    if let Ok(raw) = std::fs::read_to_string(THERMAL_ZONE) {
        if let Some(celsius) = parse_millidegrees(&raw) {
            return Some(celsius);
        }
    }
    let output = Command::new("vcgencmd").arg("measure_temp").output().ok()?;
    parse_vcgencmd(&String::from_utf8_lossy(&output.stdout))
}

fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|m| m / 1000.0)
}

/// Parses `temp=48.3'C`.
fn parse_vcgencmd(output: &str) -> Option<f64> {
    let value = output.trim().strip_prefix("temp=")?;
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Usage of the filesystem holding `dir`, via `df`.
pub fn disk_usage(dir: &Path) -> Option<DiskUsage> {
    let output = Command::new("df").arg("-kP").arg(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df(&String::from_utf8_lossy(&output.stdout))
}

fn parse_df(output: &str) -> Option<DiskUsage> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let kib = |i: usize| fields.get(i)?.parse::<u64>().ok().map(|k| k * 1024);
    Some(DiskUsage {
        total_bytes: kib(1)?,
        used_bytes: kib(2)?,
        free_bytes: kib(3)?,
    })
}

fn captures_usage(dir: &Path) -> CapturesUsage {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return CapturesUsage::default();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| super::is_safe_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .fold(CapturesUsage::default(), |acc, m| CapturesUsage {
            files: acc.files + 1,
            bytes: acc.bytes + m.len(),
        })
}

pub(super) async fn info(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    let info = blocking(&state.session, |s| {
        let dir = s.captures_dir();
        SystemInfo {
            cpu_temperature: cpu_temperature(),
            captures_dir: dir.display().to_string(),
            captures: captures_usage(dir),
            disk: disk_usage(dir),
            version: crate::VERSION,
        }
    })
    .await?;
    Ok(Json(info))
}
