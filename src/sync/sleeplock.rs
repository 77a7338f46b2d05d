//! 内容锁（sleep lock）
//!
//! 每个缓存块一把，持有期间可以跨越设备 I/O。等待者不会长时间占用
//! bucket 锁：获取内容锁之前，调用者已经释放了所有 bucket 锁。
//!
//! 每次成功加锁都会分配一个 ticket，用来回答"当前持有者是不是我"，
//! 对应 xv6 `holdingsleep()` 的语义。

use super::relax;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

/// 空闲时的 ticket
const NO_HOLDER: usize = 0;

/// 阻塞式内容锁
pub struct SleepLock<T> {
    inner: Mutex<T>,
    holder: AtomicUsize,
    next_ticket: AtomicUsize,
    name: &'static str,
}

impl<T> SleepLock<T> {
    /// 创建新的内容锁
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: AtomicUsize::new(NO_HOLDER),
            next_ticket: AtomicUsize::new(NO_HOLDER + 1),
            name,
        }
    }

    /// 获取锁，必要时一直等待
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            relax();
        }
    }

    /// 尝试获取锁，不等待
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let inner = self.inner.try_lock()?;
        let mut ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        if ticket == NO_HOLDER {
            // 回绕
            ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        }
        self.holder.store(ticket, Ordering::Release);
        Some(SleepLockGuard {
            lock: self,
            inner,
            ticket,
        })
    }

    /// 持有 `ticket` 的调用者当前是否持有此锁
    pub fn holding(&self, ticket: usize) -> bool {
        ticket != NO_HOLDER && self.holder.load(Ordering::Acquire) == ticket
    }

    /// 锁是否被任何人持有
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// 锁名称（诊断用）
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 内容锁守卫
///
/// drop 时先清除持有者 ticket，再释放底层锁。
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    inner: MutexGuard<'a, T>,
    ticket: usize,
}

impl<'a, T> SleepLockGuard<'a, T> {
    /// 本次加锁的 ticket
    pub fn ticket(&self) -> usize {
        self.ticket
    }

    /// 所属的锁
    pub fn lock(&self) -> &'a SleepLock<T> {
        self.lock
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        // `inner` 在此之后才 drop，新持有者看到的一定是已清除的 ticket
        self.lock.holder.store(NO_HOLDER, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_lock_and_holding() {
        let lock = SleepLock::new("test", 0u32);
        assert!(!lock.is_locked());

        let guard = lock.lock();
        let ticket = guard.ticket();
        assert!(lock.is_locked());
        assert!(lock.holding(ticket));
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(!lock.is_locked());
        assert!(!lock.holding(ticket));
    }

    #[test]
    fn test_tickets_are_distinct() {
        let lock = SleepLock::new("test", ());
        let first = lock.lock().ticket();
        let guard = lock.lock();
        assert_ne!(first, guard.ticket());
        assert!(!lock.holding(first));
        assert!(lock.holding(guard.ticket()));
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = SleepLock::new("counter", 0u64);
        let inside = AtomicU32::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let mut guard = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *guard += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(*lock.lock(), 2000);
    }
}
