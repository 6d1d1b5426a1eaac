pub const CHECK: &str = "Check";
pub const PULL: &str = "Pull";
pub const WAIT_CONFIRM: &str = "WaitConfirm";
pub const BACK_UP: &str = "BackUp";
pub const UPGRADE: &str = "Upgrade";
pub const ROLLBACK: &str = "Rollback";
pub const UPDATE: &str = "Update";
