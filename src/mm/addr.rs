//! 物理地址包装

use core::fmt;

use crate::consts::PGSIZE;

/// 物理地址。
///
/// 页分配器以物理页起始地址的形式分配与回收页面。
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// 不做任何检查地构造物理地址。
    ///
    /// # 安全性
    /// 调用者保证该地址确实指向可用的物理内存。
    #[inline]
    pub unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0 as *const u8
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0 as *mut u8
    }

    #[inline]
    pub fn is_page_aligned(&self) -> bool {
        self.0 % PGSIZE == 0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

/// 向上取整到页边界
#[inline]
pub fn pg_round_up(address: usize) -> usize {
    (address + (PGSIZE - 1)) & !(PGSIZE - 1)
}

/// 向下取整到页边界
#[inline]
pub fn pg_round_down(address: usize) -> usize {
    address & !(PGSIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(pg_round_up(0), 0);
        assert_eq!(pg_round_up(1), PGSIZE);
        assert_eq!(pg_round_up(PGSIZE), PGSIZE);
        assert_eq!(pg_round_down(PGSIZE + 7), PGSIZE);
    }

    #[test]
    fn page_alignment() {
        let aligned = unsafe { PhysAddr::from_raw(PGSIZE * 3) };
        let unaligned = unsafe { PhysAddr::from_raw(PGSIZE + 1) };
        assert!(aligned.is_page_aligned());
        assert!(!unaligned.is_page_aligned());
        assert_eq!(format!("{:?}", aligned), "PhysAddr(0x3000)");
    }
}
