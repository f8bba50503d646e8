//! Stable exit codes for the supervisor binary.

/// Run ended on the termination sentinel or used its whole iteration budget.
pub const OK: i32 = 0;
/// Unexpected error.
pub const INVALID: i32 = 1;
/// Missing task file, zero iteration budget, or invalid config.
pub const CONFIG: i32 = 2;
/// Isolation runtime unavailable or sandbox image build failed.
pub const ISOLATION: i32 = 3;
/// Run stopped after two consecutive resource-pressure readings.
pub const RESOURCE_EXHAUSTED: i32 = 4;
