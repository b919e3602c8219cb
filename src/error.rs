use std::io;

/// How bad an error is, and therefore what the owning loop does about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Close the affected resource, log at warn, retry with back-off.
    Transient,
    /// Log at error and trigger process-wide shutdown.
    Fatal,
    /// Synthesized because `running == false` was observed; exit quietly.
    Shutdown,
}

/// What a component loop should do after classifying a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    None,
    Reconnect,
    Shutdown,
}

/// Unified error for the meter and Modbus loops.
///
/// Severity is derived from the shape of the error, never stored, so the
/// classification table lives in exactly one place.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Serial {
        context: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Malformed telegram or Modbus frame (the source's EPROTO).
    #[error("{context}")]
    Protocol { context: String },

    /// Read or reply deadline elapsed (the source's ETIMEDOUT).
    #[error("{context}")]
    Timeout { context: String },

    /// A Modbus exception raised while building a reply.
    #[error("{context} (exception 0x{code:02X})")]
    Exception { context: String, code: u8 },

    #[error("{context}: shutdown in progress")]
    Shutdown { context: String },
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn serial(context: impl Into<String>, source: tokio_serial::Error) -> Self {
        Self::Serial {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(context: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
        }
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
        }
    }

    pub fn exception(context: impl Into<String>, code: u8) -> Self {
        Self::Exception {
            context: context.into(),
            code,
        }
    }

    pub fn shutdown(context: impl Into<String>) -> Self {
        Self::Shutdown {
            context: context.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Shutdown { .. } => Severity::Shutdown,
            Self::Protocol { .. } | Self::Timeout { .. } => Severity::Transient,
            Self::Io { source, .. } => io_severity(source),
            Self::Serial { source, .. } => serial_severity(source),
            Self::Exception { code, .. } => exception_severity(*code),
        }
    }

    pub fn action(&self) -> ErrorAction {
        match self.severity() {
            Severity::Transient => ErrorAction::Reconnect,
            Severity::Fatal => ErrorAction::Shutdown,
            Severity::Shutdown => ErrorAction::Shutdown,
        }
    }
}

/// The errno set the source treats as unrecoverable.
const FATAL_ERRNOS: [i32; 11] = [
    libc::EINVAL,
    libc::ENOMEM,
    libc::ENOENT,
    libc::ENODEV,
    libc::EACCES,
    libc::EPERM,
    libc::EBADF,
    libc::EIO,
    libc::EBUSY,
    libc::EMFILE,
    libc::ENFILE,
];

fn io_severity(err: &io::Error) -> Severity {
    if let Some(errno) = err.raw_os_error() {
        if FATAL_ERRNOS.contains(&errno) {
            return Severity::Fatal;
        }
        return Severity::Transient;
    }
    match err.kind() {
        io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::OutOfMemory => Severity::Fatal,
        _ => Severity::Transient,
    }
}

fn serial_severity(err: &tokio_serial::Error) -> Severity {
    match err.kind() {
        tokio_serial::ErrorKind::NoDevice | tokio_serial::ErrorKind::InvalidInput => {
            Severity::Fatal
        }
        tokio_serial::ErrorKind::Io(kind) => io_severity(&io::Error::from(kind)),
        tokio_serial::ErrorKind::Unknown => Severity::Transient,
    }
}

/// Modbus exception codes that indicate a broken register map rather than a
/// misbehaving client.
fn exception_severity(code: u8) -> Severity {
    match code {
        crate::modbus::frame::EXCEPTION_ILLEGAL_FUNCTION
        | crate::modbus::frame::EXCEPTION_ILLEGAL_DATA_ADDRESS
        | crate::modbus::frame::EXCEPTION_ILLEGAL_DATA_VALUE
        | crate::modbus::frame::EXCEPTION_SERVER_DEVICE_FAILURE
        | crate::modbus::frame::EXCEPTION_GATEWAY_TARGET_FAILED => Severity::Fatal,
        _ => Severity::Transient,
    }
}
