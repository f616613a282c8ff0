// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::{SyncConfig, SyncNodeConfig};
use proposal_sync_config::Config;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Current wall-clock time in unix seconds
pub fn now_secs() -> u64 {
    now_ms() / 1000
}

// Generate a node config template and write it to a file.
pub fn generate_sync_node_config_and_write_to_file(path: &Path) -> Result<(), anyhow::Error> {
    let config = SyncNodeConfig {
        network_id: "sepolia".to_string(),
        contract_address: "0x0000000000000000000000000000000000000000".to_string(),
        ledger_rpc_url: "http://127.0.0.1:8545".to_string(),
        cache_dir: PathBuf::from("/path/to/proposal-cache"),
        metrics_address: Some(([0, 0, 0, 0], 9184).into()),
        sync: SyncConfig::default(),
    };
    config.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proposal-sync.yaml");
        generate_sync_node_config_and_write_to_file(&path).unwrap();

        let config = SyncNodeConfig::load(&path).unwrap();
        assert_eq!(config.network_id, "sepolia");
        assert_eq!(config.sync, SyncConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_now_is_consistent() {
        let ms = now_ms();
        let secs = now_secs();
        assert!(secs >= ms / 1000);
        assert!(secs - ms / 1000 <= 1);
    }
}
