/// Redirection marker inserted into 32-bit views of redirected keys.
pub const WOW64_MARKER: &str = "Wow6432Node";

/// Reserved value-name prefix of a tombstone. The deleted subkey's leaf name
/// follows the prefix; the value lives in the Diff copy of the parent key.
pub const TOMBSTONE_PREFIX: &str = "__deleted_key__:";

/// Payload of a tombstone value (`REG_DWORD`, nonzero).
pub const TOMBSTONE_MARKER: u32 = 1;

/// Sidecar holding the exclusive OS lock for the lifetime of an open hive.
pub const HIVE_LOCK_SUFFIX: &str = ".lock";

/// Transient file written during save and renamed over the hive.
pub const HIVE_TEMP_SUFFIX: &str = ".tmp";

/// First four bytes of every hive file.
pub const HIVE_MAGIC: [u8; 4] = *b"RGOV";

/// Current on-disk format version, stored little-endian after the magic.
pub const HIVE_FORMAT_VERSION: u32 = 1;

/// Stable alias used in place of the user SID inside offline hives, so a hive
/// captured under one account loads under another.
pub const CURRENT_USER_ALIAS: &str = "CurrentUser";

/// First opaque handle value handed out by the handle table. Values advance in
/// steps of [`HANDLE_STEP`] and stay below the predefined root range.
pub const HANDLE_BASE: u64 = 0x0100_0000;
pub const HANDLE_STEP: u64 = 4;

/// Default interval between two periodic flushes of the Diff hive.
pub const DEFAULT_FLUSH_SECONDS: u64 = 30;

// Win32 error codes returned by the intercepted `Reg*` functions.
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_LOCK_VIOLATION: u32 = 33;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_NO_MORE_ITEMS: u32 = 259;
pub const ERROR_BADDB: u32 = 1009;
pub const ERROR_REGISTRY_IO_FAILED: u32 = 1016;
pub const ERROR_KEY_DELETED: u32 = 1018;

// NTSTATUS values returned by the intercepted `Nt*` functions.
pub const STATUS_OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
pub const STATUS_INVALID_HANDLE: u32 = 0xC000_0008;
pub const STATUS_NO_MORE_ENTRIES: u32 = 0x8000_001A;
pub const STATUS_INVALID_PARAMETER: u32 = 0xC000_000D;
pub const STATUS_FILE_LOCK_CONFLICT: u32 = 0xC000_0054;
pub const STATUS_REGISTRY_CORRUPT: u32 = 0xC000_014C;
pub const STATUS_REGISTRY_IO_FAILED: u32 = 0xC000_014D;
pub const STATUS_UNSUCCESSFUL: u32 = 0xC000_0001;
