use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

#[derive(Debug)]
pub enum NbtError {
    Io(std::io::Error),
    UnknownTag(u8),
    ExpectedCompound(u8),
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    MissingField(&'static str),
}

impl Display for NbtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NbtError::Io(e) => write!(f, "NBT I/O error: {}", e),
            NbtError::UnknownTag(id) => write!(f, "unknown NBT tag id {}", id),
            NbtError::ExpectedCompound(id) => {
                write!(f, "expected NBT compound, found tag id {}", id)
            }
            NbtError::TypeMismatch { name, expected } => {
                write!(f, "NBT field '{}' is not a {}", name, expected)
            }
            NbtError::MissingField(name) => write!(f, "missing NBT field '{}'", name),
        }
    }
}

impl Error for NbtError {}

impl From<std::io::Error> for NbtError {
    fn from(e: std::io::Error) -> Self {
        NbtError::Io(e)
    }
}

#[derive(Debug)]
pub enum LevelError {
    Io(std::io::Error),
    Nbt(NbtError),
    UnsupportedCompression(u8),
    BadChunkSize {
        field: &'static str,
        len: usize,
    },
}

impl Display for LevelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelError::Io(e) => write!(f, "level I/O error: {}", e),
            LevelError::Nbt(e) => write!(f, "level NBT error: {}", e),
            LevelError::UnsupportedCompression(ty) => {
                write!(f, "unsupported chunk compression type {}", ty)
            }
            LevelError::BadChunkSize { field, len } => {
                write!(f, "chunk field '{}' has unexpected length {}", field, len)
            }
        }
    }
}

impl Error for LevelError {}

impl From<std::io::Error> for LevelError {
    fn from(e: std::io::Error) -> Self {
        LevelError::Io(e)
    }
}

impl From<NbtError> for LevelError {
    fn from(e: NbtError) -> Self {
        LevelError::Nbt(e)
    }
}
