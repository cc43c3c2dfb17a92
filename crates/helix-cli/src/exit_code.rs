//! Process exit codes.
//!
//! Scripts can rely on these staying stable across releases.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Bad arguments or configuration.
pub const USAGE_ERROR: u8 = 2;
/// Wrong password or key file.
pub const AUTH_FAILED: u8 = 3;
/// Not an encrypted directory, or its header is damaged.
pub const DIRECTORY_INVALID: u8 = 4;
pub const PERMISSION_DENIED: u8 = 5;
pub const NOT_FOUND: u8 = 6;
/// The pass finished but left conflicts for the operator.
pub const CONFLICTS: u8 = 7;
/// An encrypted file failed authentication.
pub const INTEGRITY_VIOLATION: u8 = 8;
