#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syscall error: {0}")]
    Sys(#[from] nix::Error),

    #[error("Datagram too short for a header: {0} bytes")]
    TruncatedHeader(usize),

    #[error("Invalid header length: {0}")]
    BadHeaderLen(u8),

    #[error("Payload shorter than advertised: have {have}, header says {want}")]
    TruncatedPayload { want: usize, have: usize },
}
