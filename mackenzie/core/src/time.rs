//! Wallclock helpers. All timestamps in this workspace are whole seconds since the
//! Unix epoch, matching the original's `int(time.time())`.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}
