use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum CaptureError {
    UnsupportedPlatform {
        target_os: &'static str,
    },
    InstallHandler {
        signal: i32,
        source: io::Error,
    },
    RestoreHandler {
        signal: i32,
        source: io::Error,
    },
    NotInitialized,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform { target_os } => write!(
                f,
                "unsupported platform for thread capture backend: {target_os}; only Linux and Windows are implemented"
            ),
            Self::InstallHandler { signal, source } => {
                write!(f, "failed to install capture handler for signal {signal}: {source}")
            }
            Self::RestoreHandler { signal, source } => {
                write!(f, "failed to restore previous handler for signal {signal}: {source}")
            }
            Self::NotInitialized => write!(f, "capture subsystem used before init()"),
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InstallHandler { source, .. } | Self::RestoreHandler { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
