pub trait DataStorage {
    fn len(&self) -> Result<u64>;

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("read-only")]
    ReadOnly,
    #[error("short read")]
    ShortRead,
    #[error("short write")]
    ShortWrite,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
