//! 磁盘布局相关的常量

pub use block_dev::BLOCK_SIZE;

/// 单个 inode 记录的字节数
pub const INODE_SIZE: usize = 32;
/// 每块容纳的 inode 个数
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 直接索引个数
pub const DIRECT_COUNT: usize = 11;
/// 间接索引块的编号容量，每个编号占2字节
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / 2;
/// 单个文件最多占用的数据块数
pub const MAX_FILE_BLOCKS: usize = DIRECT_COUNT + INDIRECT_COUNT;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// 超级块记录无效时，自愈格式化使用的 inode 个数
pub const DEFAULT_INODES: u32 = 64;

/// 文件名的最大字符数
pub const NAME_MAX_LEN: usize = 30;
/// 目录中每个文件名槽位的字节数
pub const NAME_FIELD_SIZE: usize = 60;
/// 目录槽位序列化后的字节数：长度字段 + 文件名字段
pub const DIR_SLOT_SIZE: usize = 4 + NAME_FIELD_SIZE;

/// 块编号的空值
pub const NIL: u16 = 0xFFFF;
/// 空闲链表的结尾
pub const FREE_LIST_END: u32 = 0xFFFF_FFFF;

/// 根目录占用 0 号 inode
pub const ROOT_INODE: u16 = 0;
pub const ROOT_NAME: &str = "/";

/// inode 个数的上限：目录本身须放得进 0 号文件
pub const MAX_INODES: u32 = (MAX_FILE_SIZE / DIR_SLOT_SIZE) as u32;
