use std::io;

/// Whether a write failed because the peer went away, as opposed to a real I/O fault.
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_peer_errors() {
        assert!(is_disconnect(&io::ErrorKind::BrokenPipe.into()));
        assert!(is_disconnect(&io::ErrorKind::ConnectionReset.into()));
        assert!(!is_disconnect(&io::ErrorKind::PermissionDenied.into()));
        assert!(!is_disconnect(&io::Error::new(io::ErrorKind::Other, "boom")));
    }
}
