//! # 磁盘数据结构层
//!
//! 卷的磁盘布局：
//! 超级块 | 索引节点区域 | 空闲块/数据块区域
//!
//! 空闲块不另设位图，每个空闲块的前4字节存放下一个空闲块的编号。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{IndirectSlot, Inode, InodeStatus};

use std::sync::Arc;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::Result;
use crate::config::{
    BLOCK_SIZE, DIR_SLOT_SIZE, DIRECT_COUNT, INODES_PER_BLOCK, INODE_SIZE, MAX_INODES,
};

/// inode 区域的访问入口。
///
/// 同一块里挤着 16 个 inode，写回任何一个都要读出整块再写回，
/// 所以对 inode 区域的读写全部串行化。
pub struct InodeArea {
    block_device: Arc<dyn BlockDevice>,
    lock: Mutex<()>,
}

impl InodeArea {
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self, inumber: u16) -> Result<Inode> {
        let _guard = self.lock.lock();
        Inode::from_disk(inumber, &self.block_device)
    }

    pub fn store(&self, inumber: u16, inode: &Inode) {
        let _guard = self.lock.lock();
        inode.to_disk(inumber, &self.block_device);
    }

    /// 读出、修改、写回，整个过程不会与其它 inode 的写回交错
    pub fn update<V>(&self, inumber: u16, f: impl FnOnce(&mut Inode) -> V) -> Result<V> {
        let _guard = self.lock.lock();
        let mut inode = Inode::from_disk(inumber, &self.block_device)?;
        let ret = f(&mut inode);
        inode.to_disk(inumber, &self.block_device);
        Ok(ret)
    }
}

/// inode 所在的块，跳过 0 号超级块
#[inline]
pub const fn inode_block(inumber: u16) -> usize {
    inumber as usize / INODES_PER_BLOCK + 1
}

/// inode 在所在块中的序号
#[inline]
pub const fn inode_slot(inumber: u16) -> usize {
    inumber as usize % INODES_PER_BLOCK
}

/// 块内序号对应的字节偏移
#[inline]
pub const fn inode_byte_offset(slot: usize) -> usize {
    slot * INODE_SIZE
}

/// 通过编号获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
#[inline]
pub const fn inode_pos(inumber: u16) -> (usize, usize) {
    (inode_block(inumber), inode_byte_offset(inode_slot(inumber)))
}

/// 容纳 `total_inodes` 个 inode 所需的块数
#[inline]
pub const fn inode_area_blocks(total_inodes: u32) -> usize {
    (total_inodes as usize).div_ceil(INODES_PER_BLOCK)
}

/// 目录内容占用的块数，每个 inode 一个槽位，超出直接索引时另加间接索引块
#[inline]
pub const fn directory_blocks(total_inodes: u32) -> usize {
    let blocks = (total_inodes as usize * DIR_SLOT_SIZE).div_ceil(BLOCK_SIZE);
    if blocks > DIRECT_COUNT { blocks + 1 } else { blocks }
}

/// `total_blocks` 块的设备能否放下超级块、`total_inodes` 个 inode 以及目录
pub const fn fits(total_blocks: u32, total_inodes: u32) -> bool {
    if total_inodes == 0 || total_inodes > MAX_INODES {
        return false;
    }
    1 + inode_area_blocks(total_inodes) + directory_blocks(total_inodes) <= total_blocks as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing() {
        assert_eq!(inode_pos(0), (1, 0));
        assert_eq!(inode_pos(1), (1, 32));
        assert_eq!(inode_pos(15), (1, 480));
        assert_eq!(inode_pos(16), (2, 0));
        assert_eq!(inode_pos(33), (3, 32));

        assert_eq!(inode_area_blocks(1), 1);
        assert_eq!(inode_area_blocks(16), 1);
        assert_eq!(inode_area_blocks(17), 2);
        assert_eq!(inode_area_blocks(64), 4);
    }

    #[test]
    fn capacity() {
        assert_eq!(directory_blocks(1), 1);
        assert_eq!(directory_blocks(64), 8);
        // 11 块数据之外还需要间接索引块
        assert_eq!(directory_blocks(88), 11);
        assert_eq!(directory_blocks(89), 13);

        assert!(!fits(2, 1));
        assert!(fits(3, 8));
        assert!(!fits(3, 9));
        assert!(fits(13, 64));
        assert!(!fits(12, 64));
        assert!(fits(12, 56));
        assert!(!fits(u16::MAX as u32, 0));
        assert!(!fits(u16::MAX as u32, MAX_INODES + 1));
    }
}
