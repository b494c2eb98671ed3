/// Sliding window length for per-sender-per-room message admission, in seconds
pub const SEND_WINDOW_SECS: u64 = 10;

/// Maximum admitted messages per (sender, room) inside one window
pub const SEND_BURST_CAPACITY: usize = 5;

/// Upper bound on any single storage call made by the relay, in milliseconds
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Default lifetime of an issued access token, in hours
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 4000;

/// Per-IP HTTP request budget (requests per window)
pub const HTTP_RATE_LIMIT_MAX: usize = 120;

/// Per-IP HTTP request window, in seconds
pub const HTTP_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Default page size for message history
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page of message history a client may request
pub const MAX_PAGE_SIZE: u32 = 100;
