//! 同步原语
//!
//! - bucket 锁与设备锁直接使用 `spin::Mutex`（短临界区）
//! - [`SleepLock`] 是每个缓存块的内容锁，可以跨越设备 I/O 持有
//! - [`fatal`] 是所有不变量违反的终止出口

mod sleeplock;

pub use sleeplock::{SleepLock, SleepLockGuard};

use crate::error::Error;

/// 等待内容锁时让出 CPU
///
/// 有 std 时让出线程；裸机环境只能自旋。
#[inline]
pub(crate) fn relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();
    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}

/// 以诊断信息终止
///
/// 用于契约违反（未持有内容锁就写或释放）、缓存块耗尽等不可恢复的情况。
#[cold]
#[track_caller]
pub fn fatal(op: &str, err: &Error) -> ! {
    log::error!("[BCACHE] {}: {}", op, err);
    panic!("{}: {}", op, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    #[should_panic(expected = "bget: NoSpace: no buffers")]
    fn test_fatal_message() {
        fatal("bget", &Error::new(ErrorKind::NoSpace, "no buffers"));
    }
}
