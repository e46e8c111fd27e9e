//! Environment overrides for `CostgateConfig::load`.
//!
//! Kept in its own test binary with a single test: the variables are process
//! wide and would otherwise bleed into the file-layer tests.

use costgate_core::{CostgateConfig, ExpiryPolicy};
use std::path::PathBuf;

const VARS: [&str; 3] = [
    "COSTGATE__CACHE__EXPIRY",
    "COSTGATE__CACHE__PATH",
    "COSTGATE__PRICING__USD_PER_TIB",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
fn test_environment_overrides_file() {
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("costgate.toml");
    std::fs::write(
        &path,
        r#"
[cache]
path = "/tmp/costgate-file-cache"
expiry = "weekly"

[pricing]
usd_per_tib = 7.5
"#,
    )
    .unwrap();

    // File layer alone
    let config = CostgateConfig::load(Some(&path)).unwrap();
    assert_eq!(config.cache.expiry, ExpiryPolicy::Weekly);
    assert_eq!(config.cache.path, PathBuf::from("/tmp/costgate-file-cache"));

    // Environment wins over the file
    std::env::set_var("COSTGATE__CACHE__EXPIRY", "monthly");
    std::env::set_var("COSTGATE__CACHE__PATH", "/tmp/costgate-env-cache");
    std::env::set_var("COSTGATE__PRICING__USD_PER_TIB", "5");

    let config = CostgateConfig::load(Some(&path)).unwrap();
    assert_eq!(config.cache.expiry, ExpiryPolicy::Monthly);
    assert_eq!(config.cache.path, PathBuf::from("/tmp/costgate-env-cache"));
    assert_eq!(config.pricing.usd_per_tib, 5.0);
    assert!(config.cache.enabled);

    // A zero-minute window turns the cache off
    std::env::set_var("COSTGATE__CACHE__EXPIRY", "0");
    let config = CostgateConfig::load(Some(&path)).unwrap();
    assert_eq!(config.cache.expiry, ExpiryPolicy::Custom(0));
    assert!(!config.cache.enabled);

    std::env::set_var("COSTGATE__CACHE__EXPIRY", "fortnightly");
    assert!(CostgateConfig::load(Some(&path)).is_err());

    clear_env();
}
