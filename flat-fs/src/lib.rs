//! # flat-fs
//!
//! 单一扁平目录的小型文件系统，建立在按块读写的设备之上。
//! 多个线程共享同一个 [`FileSystem`]，打开文件表负责仲裁读写互斥。

/* flat-fs 的整体架构，自上而下 */

// 文件系统层：文件的打开、读写、定位、关闭与删除
mod fs;
pub use fs::{FileSystem, FsStat, Stat, Whence};

// 打开文件表：登记打开的会话，阻塞与唤醒冲突的打开者
mod file_table;
pub use file_table::{Access, FileHandle, OpenMode};

// 目录：文件名到 inode 编号的映射，保存在 0 号 inode 中
mod directory;

// 磁盘数据结构层：超级块、空闲链表与 inode
mod layout;

mod codec;
pub mod config;
mod error;
pub use error::{FsError, Result};

// 磁盘块设备接口层
pub use block_dev::{BLOCK_SIZE, BlockDevice};

type DataBlock = [u8; BLOCK_SIZE];
