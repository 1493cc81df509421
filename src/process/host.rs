//! 测试用的宿主机环境：用 std 线程模拟处理器与调度器

use std::cell::Cell;
use std::sync::{Condvar, Mutex};

use super::{CpuLocal, Scheduler};
use crate::spinlock::SpinLockGuard;

thread_local! {
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
}

/// 把当前线程“绑定”到处理器 `id` 上。
pub(crate) fn set_cpu(id: usize) {
    CPU_ID.with(|c| c.set(id));
}

/// 以线程局部变量作为当前处理器编号。
pub(crate) struct HostCpus;

impl CpuLocal for HostCpus {
    fn cpu_id(&self) -> usize {
        CPU_ID.with(|c| c.get())
    }
}

/// 基于条件变量的调度器。
///
/// 不区分通道：每次唤醒都推进纪元，所有睡眠者醒来后各自重新检查条件。
pub(crate) struct HostScheduler {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl HostScheduler {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            cond: Condvar::new(),
        }
    }
}

impl Scheduler for HostScheduler {
    fn sleep(&self, _channel: usize, guard: SpinLockGuard<'_, ()>) {
        let mut epoch = self.epoch.lock().unwrap();
        let seen = *epoch;
        drop(guard);
        while *epoch == seen {
            epoch = self.cond.wait(epoch).unwrap();
        }
    }

    fn wakeup(&self, _channel: usize) {
        *self.epoch.lock().unwrap() += 1;
        self.cond.notify_all();
    }
}
