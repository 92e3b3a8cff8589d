use std::path::PathBuf;

use crate::error::LockVaultError;
use crate::Result;

/// Per-entry MAC and nonce+counter sizes of the sealed table format.
/// Reserved together with `key_opt`/`mac_opt` until that format is wired up.
pub const MAC_SIZE: usize = 16;
pub const NAC_SIZE: usize = 16;

/// Startup parameters of a [`LockManager`](crate::LockManager).
///
/// `lock_table_size` doubles as the bucket count of the row-to-worker
/// routing, so changing it redistributes rows over the workers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total worker threads, one of which is reserved for registration.
    pub num_threads: usize,
    /// Index of the reserved registration worker.
    pub tx_thread_id: usize,
    pub transaction_table_size: usize,
    pub lock_table_size: usize,
    /// Location of the sealed key pair.
    pub key_path: PathBuf,

    // Tuning knobs of the underlying map layer, reserved.
    pub max_buf_size: usize,
    pub bucket_size: usize,
    pub tree_root_size: usize,
    pub key_opt: bool,
    pub mac_opt: bool,
}

impl Config {
    /// A configuration with `num_threads` workers, the last one reserved
    /// for registration jobs.
    pub fn new(num_threads: usize) -> Config {
        Config {
            num_threads,
            tx_thread_id: num_threads.saturating_sub(1),
            transaction_table_size: 256,
            lock_table_size: 1024,
            key_path: PathBuf::from("lockvault_keys.json"),
            max_buf_size: 1024,
            bucket_size: 64,
            tree_root_size: 256,
            key_opt: false,
            mac_opt: false,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_threads < 2 {
            return Err(LockVaultError::BadConfig(
                "at least two workers are required, one is reserved for registration".to_string(),
            ));
        }
        if self.tx_thread_id >= self.num_threads {
            return Err(LockVaultError::BadConfig(format!(
                "tx_thread_id {} is out of range for {} workers",
                self.tx_thread_id, self.num_threads
            )));
        }
        if self.lock_table_size == 0 || self.transaction_table_size == 0 {
            return Err(LockVaultError::BadConfig(
                "table sizes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new(4)
    }
}
