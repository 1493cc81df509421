//! 物理页分配器，每个处理器一条空闲链表
//!
//! 为用户进程、内核栈、页表页和管道缓冲区分配整页（`PGSIZE` 字节）物理内存。

use array_macro::array;
use bit_field::BitField;

use core::mem::size_of;
use core::ptr;
use core::slice;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::consts::{ALLOC_JUNK, FREE_JUNK, NCPU, PGSIZE};
use crate::process::CpuLocal;
use crate::spinlock::SpinLock;
use super::addr::{pg_round_down, pg_round_up, PhysAddr};
use super::list::FreeList;

/// 页分配失败。
///
/// 这是页分配器唯一可恢复的错误，由调用方决定如何处理（例如让请求内存的系统调用失败）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KallocError {
    #[error("out of physical memory")]
    OutOfMemory,
}

/// 按处理器分片的物理页分配器。
///
/// 每个处理器拥有自己的空闲链表和自旋锁，分配与回收默认只访问本处理器的链表；
/// 本处理器链表为空时，依次从其他处理器的链表“窃取”一页。
///
/// 管理区间起始处的若干页用于存放空闲位图，位图中每页一位，
/// 置位表示该页在某条空闲链表中，用于发现重复释放。
pub struct Kmem<C: CpuLocal> {
    /// 每个处理器的空闲链表
    lists: [SpinLock<FreeList>; NCPU],

    /// 第一个可分配页的地址
    base: usize,

    /// 管理区间的结束地址（不含）
    top: usize,

    free_map: &'static [AtomicU64],

    /// 初始化阶段：释放的页按处理器轮流分配，而不是归还给当前处理器
    init_phase: AtomicBool,

    next_cpu: AtomicUsize,

    cpus: C,
}

impl<C: CpuLocal> Kmem<C> {
    /// 初始化页分配器，管理物理内存 `[start, end)`。
    ///
    /// # 功能说明
    /// - `start` 通常是内核镜像末尾（链接脚本中的 `end` 符号），`end` 通常是 `PHYSTOP`；
    /// - 两端按页对齐后，先在区间起始处划出空闲位图，其余页逐个释放；
    /// - 释放期间处于初始化阶段，页面按处理器编号轮流挂到各条空闲链表上，
    ///   结束后各处理器的空闲页数相差不超过 1。
    ///
    /// # 参数
    /// - `start`：可管理物理内存的起始地址；
    /// - `end`：可管理物理内存的结束地址（不含）；
    /// - `cpus`：查询当前处理器编号的接口。
    ///
    /// # 安全性
    /// - `[start, end)` 必须是可读写的内存，在内核整个生命周期内归本分配器独占；
    /// - 只能在其他处理器开始分配之前调用一次。
    pub unsafe fn new(start: usize, end: usize, cpus: C) -> Self {
        let start = pg_round_up(start);
        let end = pg_round_down(end);
        if end <= start {
            panic!("kinit: empty range [{:#x}, {:#x})", start, end);
        }

        // 空闲位图放在区间开头
        let npages = (end - start) / PGSIZE;
        let words = (npages + 63) / 64;
        let meta = pg_round_up(words * size_of::<AtomicU64>());
        if meta >= end - start {
            panic!("kinit: range [{:#x}, {:#x}) too small", start, end);
        }
        let map_ptr = start as *mut AtomicU64;
        for i in 0..words {
            ptr::write(map_ptr.add(i), AtomicU64::new(0));
        }

        let kmem = Self {
            lists: array![_ => SpinLock::new(FreeList::new(), "kmem"); NCPU],
            base: start + meta,
            top: end,
            free_map: slice::from_raw_parts(map_ptr, words),
            init_phase: AtomicBool::new(true),
            next_cpu: AtomicUsize::new(0),
            cpus,
        };
        log::info!(
            "kmem: available physical memory [{:#x}, {:#x}), {:#x} bytes meta data",
            kmem.base,
            kmem.top,
            meta
        );

        kmem.freerange();
        kmem.init_phase.store(false, Ordering::Release);

        log::info!("kmem: {} free pages on {} cpus", kmem.total_pages(), NCPU);
        #[cfg(feature = "verbose_init_info")]
        for cpu in 0..NCPU {
            log::info!("kmem: cpu {} starts with {} free pages", cpu, kmem.nfree(cpu));
        }

        kmem
    }

    fn freerange(&self) {
        let mut p = self.base;
        while p + PGSIZE <= self.top {
            // 安全性：区间内的页此时都无人使用
            unsafe { self.kfree(PhysAddr::from_raw(p)) };
            p += PGSIZE;
        }
    }

    /// 回收一页物理内存。
    ///
    /// # 功能说明
    /// 先用 `FREE_JUNK` 填满整页，再挂到空闲链表上。初始化阶段按处理器轮流分配，
    /// 之后挂到当前处理器的链表上。
    ///
    /// # 可能的错误
    /// 以下情况说明调用方有编程错误，直接 panic：
    /// - 地址不是页对齐的；
    /// - 地址不在管理区间内；
    /// - 该页已经在空闲链表中（重复释放）。
    ///
    /// # 安全性
    /// `pa` 通常应由 [`Kmem::kalloc`] 返回，调用之后不得再访问这一页。
    pub unsafe fn kfree(&self, mut pa: PhysAddr) {
        let raw = pa.as_usize();
        if !pa.is_page_aligned() || raw < self.base || raw >= self.top {
            panic!("kfree: bad page {:#x}", raw);
        }

        let (word, bit) = self.map_pos(raw);
        let old = self.free_map[word].fetch_or(1 << bit, Ordering::AcqRel);
        if old.get_bit(bit) {
            panic!("kfree: double free {:#x}", raw);
        }

        // Fill with junk
        ptr::write_bytes(pa.as_mut_ptr(), FREE_JUNK, PGSIZE);

        let cpu = if self.init_phase.load(Ordering::Acquire) {
            self.next_cpu.fetch_add(1, Ordering::Relaxed) % NCPU
        } else {
            self.my_cpu()
        };
        self.lists[cpu].lock().push(raw);
    }

    /// 分配一页物理内存。
    ///
    /// # 功能说明
    /// 优先从当前处理器的空闲链表弹出；为空时按编号顺序逐个锁住其他处理器的链表，
    /// 取走第一个可用页，最多扫描一轮。分配出去的页用 `ALLOC_JUNK` 填满。
    ///
    /// # 返回值
    /// - `Ok(pa)`：分配到的页；
    /// - `Err(KallocError::OutOfMemory)`：所有处理器的空闲链表都为空。
    pub fn kalloc(&self) -> Result<PhysAddr, KallocError> {
        let cpu = self.my_cpu();

        let mut r = self.lists[cpu].lock().pop();
        if r.is_none() {
            // 从其他处理器窃取
            for i in (0..NCPU).filter(|&i| i != cpu) {
                r = self.lists[i].lock().pop();
                if r.is_some() {
                    log::trace!("kmem: cpu {} steals a page from cpu {}", cpu, i);
                    break;
                }
            }
        }

        let raw = match r {
            Some(raw) => raw,
            None => {
                log::warn!("kmem: out of physical memory on cpu {}", cpu);
                return Err(KallocError::OutOfMemory);
            }
        };

        let (word, bit) = self.map_pos(raw);
        self.free_map[word].fetch_and(!(1 << bit), Ordering::AcqRel);

        // 安全性：raw 来自空闲链表，位于管理区间内且无人使用
        let mut pa = unsafe { PhysAddr::from_raw(raw) };
        unsafe { ptr::write_bytes(pa.as_mut_ptr(), ALLOC_JUNK, PGSIZE) };
        Ok(pa)
    }

    /// 可分配页的总数
    pub fn total_pages(&self) -> usize {
        (self.top - self.base) / PGSIZE
    }

    /// 处理器 `cpu` 空闲链表中的页数
    pub fn nfree(&self, cpu: usize) -> usize {
        self.lists[cpu].lock().len()
    }

    /// 所有空闲链表中的页数之和，只在没有并发分配/回收时才精确
    pub fn free_pages(&self) -> usize {
        (0..NCPU).map(|cpu| self.nfree(cpu)).sum()
    }

    fn my_cpu(&self) -> usize {
        let id = self.cpus.cpu_id();
        if id >= NCPU {
            panic!("kmem: cpu id {} out of range", id);
        }
        id
    }

    #[inline]
    fn map_pos(&self, raw: usize) -> (usize, usize) {
        let index = (raw - self.base) / PGSIZE;
        (index / 64, index % 64)
    }
}
