//! 处理器与调度器接口
//!
//! 块缓存与页分配器不直接依赖具体的进程管理实现，
//! 而是通过这里的两个 trait 获取“当前处理器编号”以及“睡眠/唤醒”能力，
//! 由内核在启动时注入。

use crate::spinlock::SpinLockGuard;

#[cfg(test)]
pub(crate) mod host;

/// 查询当前正在执行代码的处理器（硬件线程）。
pub trait CpuLocal: Sync {
    /// 返回当前处理器编号，取值范围为 `[0, NCPU)`。
    fn cpu_id(&self) -> usize;
}

/// 调度器提供的睡眠/唤醒原语，睡眠锁建立在其之上。
pub trait Scheduler: Sync {
    /// 在通道 `channel` 上睡眠。
    ///
    /// # 功能说明
    /// 实现必须先进入“即将睡眠”的状态，再释放 `guard`，
    /// 保证在释放 `guard` 与真正挂起之间发生的 `wakeup` 不会丢失。
    /// 返回时不再持有 `guard` 对应的锁，调用者需自行重新获取。
    fn sleep(&self, channel: usize, guard: SpinLockGuard<'_, ()>);

    /// 唤醒所有睡眠在通道 `channel` 上的执行流。
    fn wakeup(&self, channel: usize);
}
