//! Process exit codes.

pub const SUCCESS: i32 = 0;
pub const FAILED: i32 = 1; // Operation ran but did not succeed (rollout failed, poll errors)
pub const CONFIG_ERROR: i32 = 2; // Bad arguments, unreadable state, invalid descriptor
