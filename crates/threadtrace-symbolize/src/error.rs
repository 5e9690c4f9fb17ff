use std::error::Error;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum SymbolizeError {
    OpenModule { path: PathBuf, message: String },
    ParseObject { path: PathBuf, message: String },
    NoFileBackedSegments { path: PathBuf },
    AddressOverflow { base: u64, offset: u64 },
}

impl fmt::Display for SymbolizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenModule { path, message } => {
                write!(f, "open debug object '{}': {message}", path.display())
            }
            Self::ParseObject { path, message } => {
                write!(f, "parse debug object '{}': {message}", path.display())
            }
            Self::NoFileBackedSegments { path } => write!(
                f,
                "no file-backed segments in debug object '{}'",
                path.display()
            ),
            Self::AddressOverflow { base, offset } => write!(
                f,
                "address overflow combining linked image base 0x{base:x} with offset 0x{offset:x}"
            ),
        }
    }
}

impl Error for SymbolizeError {}
