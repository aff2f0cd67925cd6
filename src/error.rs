use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("engine fault: {0}")]
    EngineFault(String),
    #[error("send error: {0}")]
    Send(String),
    #[error("couldn't join on the associated thread")]
    Join,
    #[error("already shutdown")]
    AlreadyShutdown,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(err: crossbeam_channel::SendError<T>) -> Self {
        Error::Send(err.to_string())
    }
}

impl<T> From<crossbeam_channel::TrySendError<T>> for Error {
    fn from(err: crossbeam_channel::TrySendError<T>) -> Self {
        match err {
            crossbeam_channel::TrySendError::Full(_) => Error::Send("channel is full".to_string()),
            crossbeam_channel::TrySendError::Disconnected(_) => {
                Error::Send("channel disconnected".to_string())
            }
        }
    }
}
