//! 睡眠锁模块
//! 提供基于进程休眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的进程会进入休眠状态，避免忙等待。

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut, Drop};

use crate::process::Scheduler;
use crate::spinlock::SpinLock;

/// 睡眠锁。
///
/// 内部的 `lock` 自旋锁只保护 `locked` 状态本身，
/// 数据 `data` 的独占访问由 `locked` 保证。
pub struct SleepLock<T: ?Sized> {
    lock: SpinLock<()>,
    locked: Cell<bool>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// 获取睡眠锁，锁被占用时通过 `sched` 挂起当前执行流。
    ///
    /// # 功能说明
    /// 返回的守卫持有 `sched` 的引用，析构时用它唤醒其他等待者。
    /// 调用者不得持有任何自旋锁。
    pub fn lock<'a>(&'a self, sched: &'a dyn Scheduler) -> SleepLockGuard<'a, T> {
        // 获取内部自旋锁（保护locked状态）
        let mut guard = self.lock.lock();

        // 当锁已被占用时循环等待
        while self.locked.get() {
            // 让当前进程休眠，等待锁释放
            sched.sleep(self.channel(), guard);
            // 被唤醒后重新获取内部锁
            guard = self.lock.lock();
        }

        // 成功获取锁，设置状态
        self.locked.set(true);

        // 释放内部自旋锁（已设置locked状态，无需保护）
        drop(guard);

        SleepLockGuard {
            lock: self,
            sched,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 睡眠通道取 `locked` 字段的地址
    fn channel(&self) -> usize {
        self.locked.as_ptr() as usize
    }

    fn unlock(&self, sched: &dyn Scheduler) {
        let guard = self.lock.lock();
        if !self.locked.get() {
            panic!("sleeplock {} release", self.name);
        }
        self.locked.set(false);
        sched.wakeup(self.channel());
        drop(guard);
    }
}

pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    sched: &'a dyn Scheduler,
    data: &'a mut T,
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock(self.sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::host::HostScheduler;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn waiter_blocks_until_holder_releases() {
        let sched = HostScheduler::new();
        let lock = SleepLock::new(0u32, "test");
        let entered = AtomicBool::new(false);

        let mut held = lock.lock(&sched);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let mut g = lock.lock(&sched);
                entered.store(true, Ordering::SeqCst);
                *g += 1;
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!entered.load(Ordering::SeqCst));
            *held = 41;
            drop(held);
            waiter.join().unwrap();
        });
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(*lock.lock(&sched), 42);
    }

    #[test]
    fn many_threads_serialize() {
        let sched = HostScheduler::new();
        let lock = SleepLock::new(0usize, "counter");
        thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    for _ in 0..200 {
                        *lock.lock(&sched) += 1;
                    }
                });
            }
        });
        assert_eq!(*lock.lock(&sched), 1200);
    }
}
