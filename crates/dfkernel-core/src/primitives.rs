//! # Engine Primitives
//!
//! Fixed constants of the dataflow CORE.
//!
//! These values are compiled into the binary and are immutable at runtime.

/// Separator between a tag and its qualifier in a completion request.
///
/// `"total$3"` asks for the tag `total` as defined by cell `3`.
pub const TAG_QUALIFIER: char = '$';

/// Magic bytes for the persisted notebook state header.
///
/// - File Header = Magic Bytes ("DFNB") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"DFNB";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the persistence header in bytes (magic + version).
pub const HEADER_SIZE: usize = 5;

/// Maximum allowed payload size for persisted notebook state (64 MB).
///
/// Checked before any decoding is attempted.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// LOGGING & ENVIRONMENT
// =============================================================================

/// Filter used when neither the environment nor the config names one.
pub const DEFAULT_LOG_FILTER: &str = "dfkernel_core=info";

/// Environment variable holding the tracing filter directive.
pub const ENV_LOG: &str = "DFKERNEL_LOG";

/// Environment variable selecting the log format (`text` or `json`).
pub const ENV_LOG_FORMAT: &str = "DFKERNEL_LOG_FORMAT";

/// Environment variable overriding the default `silent` run flag.
pub const ENV_SILENT: &str = "DFKERNEL_SILENT";

/// Environment variable overriding the default `store_history` run flag.
pub const ENV_STORE_HISTORY: &str = "DFKERNEL_STORE_HISTORY";
