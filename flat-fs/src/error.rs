use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 参数不合法：空缓冲区、无法识别的 whence、非正的格式化规模等
    #[display(fmt = "invalid argument")]
    InvalidArgument,
    /// 目录中没有该文件名
    #[display(fmt = "no such file")]
    NotFound,
    /// 空闲块耗尽、目录已满或间接索引块已满
    #[display(fmt = "no space left on volume")]
    NoSpace,
    /// 文件处于待删除状态、句柄未登记或磁盘记录损坏
    #[display(fmt = "invalid inode state")]
    InvalidState,
}

impl std::error::Error for FsError {}

pub type Result<T> = core::result::Result<T, FsError>;
