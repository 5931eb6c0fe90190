use block_dev::DeviceError;
use derive_more::Display;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "file exists")]
    AlreadyExists,
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "is a directory")]
    IsADirectory,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    #[display(fmt = "file name too long")]
    NameTooLong,
    #[display(fmt = "no space left on device")]
    NoSpace,
    #[display(fmt = "file too large")]
    FileTooLarge,
    #[display(fmt = "invalid argument")]
    InvalidInput,
    /// 磁盘上的结构自相矛盾，或签名、版本不符
    #[display(fmt = "filesystem is corrupted")]
    Corrupted,
    #[display(fmt = "I/O error: {}", _0)]
    Io(DeviceError),
}

impl From<DeviceError> for Error {
    #[inline]
    fn from(e: DeviceError) -> Self {
        Self::Io(e)
    }
}
