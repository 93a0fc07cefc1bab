//! Display formatting for telemetry values

use humansize::{format_size, DECIMAL};

/// Bits per second as "12.3 Mbps".
pub fn format_rate(bits_per_second: f64) -> String {
    let bps = if bits_per_second.is_finite() {
        bits_per_second.max(0.0)
    } else {
        0.0
    };
    if bps >= 1_000_000_000.0 {
        format!("{:.1} Gbps", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.1} Mbps", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.1} Kbps", bps / 1_000.0)
    } else {
        format!("{:.0} bps", bps)
    }
}

/// Gigabytes as "7.8 GB", "512 GB" or "1.9 TB".
pub fn format_size_gb(gb: f64) -> String {
    if !gb.is_finite() {
        return "0 GB".to_string();
    }
    if gb >= 1000.0 {
        format!("{:.1} TB", gb / 1000.0)
    } else if gb >= 100.0 {
        format!("{:.0} GB", gb)
    } else {
        format!("{:.1} GB", gb)
    }
}

pub fn format_used_of_total(used_gb: f64, total_gb: f64) -> String {
    format!("{} / {}", format_size_gb(used_gb), format_size_gb(total_gb))
}

pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, DECIMAL)
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// "8C/16T"
pub fn cores_and_threads(physical: usize, logical: usize) -> String {
    format!("{}C/{}T", physical, logical)
}

/// GPU memory arrives in MB from some sources and GB from others. A total
/// above 512, or a missing total with a used value above 512, means MB.
pub fn normalize_gpu_memory(used_raw: f64, total_raw: f64) -> (f64, f64) {
    let values_are_mb = total_raw > 512.0 || (total_raw <= 0.0 && used_raw > 512.0);
    if values_are_mb {
        (used_raw / 1024.0, total_raw / 1024.0)
    } else {
        (used_raw, total_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_rate_thresholds() {
        assert_eq!(format_rate(0.0), "0 bps");
        assert_eq!(format_rate(999.0), "999 bps");
        assert_eq!(format_rate(1_500.0), "1.5 Kbps");
        assert_eq!(format_rate(12_340_000.0), "12.3 Mbps");
        assert_eq!(format_rate(2_000_000_000.0), "2.0 Gbps");
        assert_eq!(format_rate(f64::NAN), "0 bps");
    }

    #[test]
    fn test_format_size_gb() {
        assert_eq!(format_size_gb(7.84), "7.8 GB");
        assert_eq!(format_size_gb(512.4), "512 GB");
        assert_eq!(format_size_gb(1920.0), "1.9 TB");
        assert_eq!(format_size_gb(f64::INFINITY), "0 GB");
    }

    #[test]
    fn test_gpu_memory_in_mb_is_converted() {
        assert_eq!(normalize_gpu_memory(2048.0, 8192.0), (2.0, 8.0));
    }

    #[test]
    fn test_gpu_memory_in_gb_is_unchanged() {
        assert_eq!(normalize_gpu_memory(2.0, 8.0), (2.0, 8.0));
    }

    #[test]
    fn test_gpu_memory_missing_total() {
        assert_eq!(normalize_gpu_memory(1024.0, 0.0), (1.0, 0.0));
    }

    #[test]
    fn test_cores_and_threads() {
        assert_eq!(cores_and_threads(8, 16), "8C/16T");
    }
}
