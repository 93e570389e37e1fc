use std::ops::Range;
use std::sync::Arc;

use block_dev::BlockDevice;

use super::{Inode, fits, inode_area_blocks};
use crate::codec;
use crate::config::{BLOCK_SIZE, DEFAULT_INODES, FREE_LIST_END, INODE_SIZE, MAX_INODES};
use crate::{DataBlock, FsError, Result};

/// 超级块：
/// - 记录卷的总块数与 inode 总数；
/// - 持有空闲链表的表头，负责分配、回收单个块。
///
/// 0 号块上的记录：`total_blocks: u32, total_inodes: u32, free_list_head: u32`，
/// 偏移依次为 0、4、8。
pub struct SuperBlock {
    pub total_blocks: u32,
    pub total_inodes: u32,
    /// 第一个空闲块，或 [`FREE_LIST_END`]
    free_list_head: u32,
    block_device: Arc<dyn BlockDevice>,
}

impl SuperBlock {
    /// 读出 0 号块上的超级块记录。
    /// 若记录与设备不符，视作未格式化的卷，以默认 inode 数格式化；
    /// 设备连一个 inode 和目录都放不下时报错，且不写入任何块。
    pub fn open(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        let mut data: DataBlock = [0; BLOCK_SIZE];
        block_device.read_block(0, &mut data);

        let mut super_block = Self {
            total_blocks: codec::read_u32(&data, 0),
            total_inodes: codec::read_u32(&data, 4),
            free_list_head: codec::read_u32(&data, 8),
            block_device,
        };

        if !super_block.is_valid(total_blocks) {
            // 小设备放不下默认数量的 inode 及其目录时按设备能容纳的最大数量格式化
            let total_inodes = (1..=DEFAULT_INODES)
                .rev()
                .find(|&n| fits(total_blocks, n))
                .ok_or(FsError::InvalidArgument)?;
            log::info!(
                "no valid super block on a {total_blocks}-block device, formatting with {total_inodes} inodes"
            );
            super_block.total_blocks = total_blocks;
            super_block.format(total_inodes)?;
        }

        Ok(super_block)
    }

    /// 重写 inode 区域与空闲链表，原有内容全部作废
    pub fn format(&mut self, total_inodes: u32) -> Result<()> {
        if total_inodes == 0 || total_inodes > MAX_INODES {
            return Err(FsError::InvalidArgument);
        }
        let data_start = 1 + inode_area_blocks(total_inodes) as u32;
        // 至少留下一个数据块
        if data_start >= self.total_blocks {
            return Err(FsError::InvalidArgument);
        }
        self.total_inodes = total_inodes;

        let mut data: DataBlock = [0; BLOCK_SIZE];
        for record in data.chunks_exact_mut(INODE_SIZE) {
            Inode::unused().encode(record);
        }
        for block_id in 1..data_start {
            self.block_device.write_block(block_id as usize, &data);
        }

        // 把剩下的块串成空闲链表
        for block_id in data_start..self.total_blocks {
            let next = if block_id + 1 < self.total_blocks {
                block_id + 1
            } else {
                FREE_LIST_END
            };
            let mut data: DataBlock = [0; BLOCK_SIZE];
            codec::write_u32(&mut data, 0, next);
            self.block_device.write_block(block_id as usize, &data);
        }
        self.free_list_head = data_start;
        self.sync();

        log::info!(
            "formatted: {} blocks, {} inodes, data area {:?}",
            self.total_blocks,
            self.total_inodes,
            self.data_area()
        );
        Ok(())
    }

    /// 弹出空闲链表的表头。
    /// 返回的块内容未定义，由调用者写入。
    pub fn alloc_block(&mut self) -> Option<u16> {
        if self.free_list_head == FREE_LIST_END {
            log::debug!("free list exhausted");
            return None;
        }

        let block_id = self.free_list_head;
        let mut data: DataBlock = [0; BLOCK_SIZE];
        self.block_device.read_block(block_id as usize, &mut data);

        let mut next = codec::read_u32(&data, 0);
        if next != FREE_LIST_END && !self.data_area().contains(&next) {
            log::error!("corrupted free list: block {block_id} links to {next}");
            next = FREE_LIST_END;
        }
        self.free_list_head = next;
        self.sync();

        log::debug!("alloc block {block_id}");
        Some(block_id as u16)
    }

    /// 清零块并把它压到空闲链表表头。
    ///
    /// 重复释放会破坏链表，这里不做检测，由调用者保证。
    pub fn free_block(&mut self, block_id: u16) {
        debug_assert!(self.data_area().contains(&(block_id as u32)));

        let mut data: DataBlock = [0; BLOCK_SIZE];
        codec::write_u32(&mut data, 0, self.free_list_head);
        self.block_device.write_block(block_id as usize, &data);
        self.free_list_head = block_id as u32;
        self.sync();

        log::debug!("free block {block_id}");
    }

    /// 沿空闲链表收集全部空闲块，步数以总块数为上限，防止成环
    pub fn free_blocks(&self) -> Vec<u32> {
        let mut blocks = Vec::new();
        let mut data: DataBlock = [0; BLOCK_SIZE];
        let mut block_id = self.free_list_head;

        while block_id != FREE_LIST_END && blocks.len() < self.total_blocks as usize {
            blocks.push(block_id);
            self.block_device.read_block(block_id as usize, &mut data);
            block_id = codec::read_u32(&data, 0);
        }

        blocks
    }

    /// 数据区（inode 区域之后的全部块）
    #[inline]
    pub fn data_area(&self) -> Range<u32> {
        1 + inode_area_blocks(self.total_inodes) as u32..self.total_blocks
    }

    /// 将超级块记录写回 0 号块
    pub fn sync(&self) {
        let mut data: DataBlock = [0; BLOCK_SIZE];
        codec::write_u32(&mut data, 0, self.total_blocks);
        codec::write_u32(&mut data, 4, self.total_inodes);
        codec::write_u32(&mut data, 8, self.free_list_head);
        self.block_device.write_block(0, &data);
    }
}

impl SuperBlock {
    fn is_valid(&self, total_blocks: u32) -> bool {
        self.total_blocks == total_blocks
            && fits(total_blocks, self.total_inodes)
            && (self.free_list_head == FREE_LIST_END
                || self.data_area().contains(&self.free_list_head))
    }
}
