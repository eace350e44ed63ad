//! Stable exit codes for the `tap-harness` binary.

/// Every file passed and nothing bailed out.
pub const OK: i32 = 0;
/// At least one assertion or file failed, or a test bailed out.
pub const FAILED: i32 = 1;
/// Fatal discovery error, or invalid flags/config.
pub const ERROR: i32 = 2;
