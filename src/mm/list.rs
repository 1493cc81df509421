//! 空闲页单向链表
//!
//! 链表节点就存放在空闲页自身的起始位置，页被分配出去后节点随之消失。

use core::ptr;

#[repr(C)]
struct Run {
    next: *mut Run,
}

/// 以空闲页为节点的侵入式栈。
pub struct FreeList {
    head: *mut Run,
    len: usize,
}

// 链表只会在持有所属自旋锁时被访问
unsafe impl Send for FreeList {}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    /// 把起始地址为 `raw_addr` 的页压入链表。
    ///
    /// # 安全性
    /// `raw_addr` 必须是页对齐、当前无人使用的物理页，且不在任何空闲链表中。
    pub unsafe fn push(&mut self, raw_addr: usize) {
        let run = raw_addr as *mut Run;
        ptr::write(run, Run { next: self.head });
        self.head = run;
        self.len += 1;
    }

    /// 弹出一页，链表为空时返回 `None`。
    pub fn pop(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let run = self.head;
        // 安全性：head 非空时一定是由 push 写入的有效节点
        self.head = unsafe { (*run).next };
        self.len -= 1;
        Some(run as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
