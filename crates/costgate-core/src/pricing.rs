//! Turning a dry-run byte estimate into something an operator can judge.

use crate::config::PricingSettings;
use std::fmt;

const TIB: f64 = (1u64 << 40) as f64;
const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Estimated size and price of a query, shown before billable execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSummary {
    /// Bytes the warehouse reported it would process.
    pub bytes: u64,
    /// Approximate on-demand price in USD.
    pub usd: f64,
}

impl CostSummary {
    #[must_use]
    pub fn new(bytes: u64, pricing: &PricingSettings) -> Self {
        Self {
            bytes,
            usd: bytes as f64 / TIB * pricing.usd_per_tib,
        }
    }

    /// Size with binary units, two decimals (`1.50 GiB`).
    #[must_use]
    pub fn human_size(&self) -> String {
        human_bytes(self.bytes)
    }
}

impl fmt::Display for CostSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "This query will process {} (~${:.2}).",
            self.human_size(),
            self.usd
        )
    }
}

/// Formats a byte count with binary units.
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(3 * (1 << 30)), "3.00 GiB");
    }

    #[test]
    fn test_one_tib_costs_list_price() {
        let summary = CostSummary::new(1 << 40, &PricingSettings::default());
        assert!((summary.usd - 6.25).abs() < 1e-9);
        assert_eq!(
            summary.to_string(),
            "This query will process 1.00 TiB (~$6.25)."
        );
    }

    #[test]
    fn test_zero_bytes_is_free() {
        let summary = CostSummary::new(0, &PricingSettings { usd_per_tib: 5.0 });
        assert_eq!(summary.usd, 0.0);
        assert_eq!(summary.human_size(), "0 B");
    }
}
