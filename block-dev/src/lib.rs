//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 设备只保证单次块读写的原子性，更高层的一致性由文件系统负责。

use std::any::Any;
use std::sync::Mutex;

/// 块大小（字节）
pub const BLOCK_SIZE: usize = 512;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}

/// 内存盘：整块设备放在内存里，测试与打包工具使用
#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
}

impl RamDisk {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; total_blocks]),
        }
    }

    #[inline]
    pub fn total_blocks(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<[u8; BLOCK_SIZE]>> {
        // 持锁线程只做内存拷贝，锁中毒时数据依旧完整
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        buf.copy_from_slice(&self.lock()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        self.lock()[block_id].copy_from_slice(buf);
    }
}
