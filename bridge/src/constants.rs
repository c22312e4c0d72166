use std::time::Duration;

/// Read buffer size for miner connections
pub const READ_BUFFER_SIZE: usize = 4096;

/// Largest partial line kept while waiting for a newline
pub const MAX_LINE_BUFFER: usize = 64 * 1024;

/// Sync progress a node must exceed before jobs are minted
pub const SYNC_PROGRESS_THRESHOLD: f64 = 0.999;

/// Difficulty used for algorithm names outside the supported set
pub const UNKNOWN_ALGORITHM_DIFFICULTY: f64 = 0.01;

pub const DEFAULT_EXTRANONCE_SIZE: u8 = 4;
pub const MAX_EXTRANONCE_SIZE: u8 = 8;
pub const DEFAULT_MAX_JOBS_PER_ALGORITHM: usize = 16;

pub const DEFAULT_JOB_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SYNC_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the console stats table is printed
pub const STATS_PRINT_INTERVAL: Duration = Duration::from_secs(10);

/// Grace period for in-flight writes when the server shuts down
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// RPC error codes the node uses while it is still catching up
pub const RPC_IN_INITIAL_DOWNLOAD: i64 = -10;
pub const RPC_IN_WARMUP: i64 = -28;
