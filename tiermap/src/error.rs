use thiserror::Error;

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("bit {bit} is out of range for a bitmap of {capacity} bits")]
    OutOfRange { bit: u64, capacity: u64 },
    #[error("no free bit left in the bitmap")]
    Full,
    #[error("invalid capacity {0}: must be a positive multiple of 64")]
    InvalidCapacity(u64),
    #[error("backing store i/o failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BitmapError>;
