//! Optional scaling of per-process usage to the system totals

use std::collections::HashMap;

use super::sampler::ProcessSnapshot;
use crate::telemetry::models::GpuInfo;

/// Scale differences within this band are jitter and left alone.
const CPU_SCALE_TOLERANCE: f64 = 0.02;

/// Scale per-process CPU so the sum matches the reported total.
pub fn normalize_cpu(processes: &mut [ProcessSnapshot], reported_total: f64) {
    let measured: f64 = processes.iter().map(|p| p.cpu_percent.max(0.0)).sum();
    if reported_total <= 0.0 || measured <= 0.0 {
        return;
    }
    let scale = reported_total / measured;
    if (scale - 1.0).abs() <= CPU_SCALE_TOLERANCE {
        return;
    }
    for p in processes.iter_mut() {
        let v = p.cpu_percent * scale;
        p.cpu_percent = if v.is_finite() { v } else { 0.0 };
    }
}

/// Map measured per-adapter totals onto the reported adapters (both ordered
/// by usage, busiest first) and rescale each process's per-adapter shares.
/// Measured adapters beyond the reported count map to zero.
pub fn normalize_gpu(processes: &mut [ProcessSnapshot], adapters: &[GpuInfo]) {
    if adapters.is_empty() {
        return;
    }
    let mut measured: HashMap<String, f64> = HashMap::new();
    for p in processes.iter() {
        for (key, value) in &p.gpu_by_adapter {
            *measured.entry(key.clone()).or_insert(0.0) += value.max(0.0);
        }
    }
    if measured.is_empty() {
        return;
    }

    let mut reported: Vec<f64> = adapters.iter().map(|a| a.usage.max(0.0)).collect();
    reported.sort_by(|a, b| b.total_cmp(a));
    let mut ordered: Vec<(&String, f64)> = measured.iter().map(|(k, v)| (k, *v)).collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));

    let scales: HashMap<String, f64> = ordered
        .iter()
        .enumerate()
        .map(|(i, (key, total))| {
            let target = reported.get(i).copied().unwrap_or(0.0);
            let scale = if *total > 0.0 { target / total } else { 0.0 };
            ((*key).clone(), if scale.is_finite() { scale } else { 0.0 })
        })
        .collect();

    for p in processes.iter_mut() {
        if p.gpu_by_adapter.is_empty() {
            continue;
        }
        let mut sum = 0.0;
        for (key, value) in p.gpu_by_adapter.iter_mut() {
            let scale = scales.get(key).copied().unwrap_or(0.0);
            *value = (*value * scale).clamp(0.0, 100.0);
            sum += *value;
        }
        p.gpu_percent = sum.clamp(0.0, 100.0);
    }
}
