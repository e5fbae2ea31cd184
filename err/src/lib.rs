#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Not implemented")]
    Unimplemented,
    #[error("Value out of range")]
    Value,
    #[error("IO: {0}")]
    Io(IoError),
    #[error("FS: {0}")]
    Fs(FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("Read-only")]
    ReadOnly,
    #[error("Read failed")]
    Read,
    #[error("Write failed")]
    Write,
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Index")]
    Index,
    #[error("Pool exhausted")]
    Memory,
    #[error("Access denied")]
    Access,
    #[error("Name already exists")]
    Exist,
    #[error("Not found")]
    NotFound,
    #[error("Directory not empty")]
    Empty,
    #[error("End of file")]
    EndOfFile,
    #[error("No free clusters")]
    Full,
}

pub type Result<T> = core::result::Result<T, Error>;
