// Engine tunables (no magic values)
use std::time::Duration;

/// How long a claim stays valid without a heartbeat (30s)
pub const DEFAULT_LOCK_DURATION_MS: i64 = 30_000;

/// Heartbeat period for lock renewal; well inside the lock duration
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between stall/delay sweeps when none is configured (15s)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Max jobs a single sweep pass handles per queue
pub const DEFAULT_SWEEP_BATCH: u32 = 100;

/// Reload-and-retry rounds when an optimistic write loses a race
pub const DEFAULT_CAS_RETRIES: u32 = 3;

/// Maximum JSON nesting accepted in a job payload
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Maximum job name length (bytes)
pub const MAX_JOB_NAME_LEN: usize = 128;

/// Sleep duration when no jobs are available (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Jobs claimed per worker poll
pub const DEFAULT_WORKER_BATCH_SIZE: u32 = 1;
