//! Typed pipes over a socketpair, for parent/child coordination around fork.
use std::{
    io::{self, Read, Write},
    marker::PhantomData,
    os::{fd::AsRawFd, unix::net::UnixStream},
};

/// A value with a fixed-size native byte encoding.
pub(crate) trait Wire: Copy {
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    fn encode(self) -> Self::Bytes;
    fn decode(bytes: Self::Bytes) -> Self;
}

impl Wire for i32 {
    type Bytes = [u8; std::mem::size_of::<Self>()];

    fn encode(self) -> Self::Bytes {
        self.to_ne_bytes()
    }
    fn decode(bytes: Self::Bytes) -> Self {
        Self::from_ne_bytes(bytes)
    }
}

impl Wire for u8 {
    type Bytes = [u8; 1];

    fn encode(self) -> Self::Bytes {
        [self]
    }
    fn decode(bytes: Self::Bytes) -> Self {
        bytes[0]
    }
}

/// One end of a pipe carrying values of a single fixed-size type.
///
/// Both file descriptors are close-on-exec, so the child's copies vanish
/// when the command is executed.
pub(crate) struct BinPipe<T: Wire> {
    sock: UnixStream,
    _marker: PhantomData<T>,
}

impl<T: Wire> BinPipe<T> {
    pub(crate) fn pair() -> io::Result<(BinPipe<T>, BinPipe<T>)> {
        let (first, second) = UnixStream::pair()?;
        Ok((
            BinPipe {
                sock: first,
                _marker: PhantomData,
            },
            BinPipe {
                sock: second,
                _marker: PhantomData,
            },
        ))
    }

    /// Read a `T` from the pipe.
    pub(crate) fn read(&mut self) -> io::Result<T> {
        let mut bytes = T::Bytes::default();
        self.sock.read_exact(bytes.as_mut())?;
        Ok(T::decode(bytes))
    }

    /// Write a `T` to the pipe.
    pub(crate) fn write(&mut self, value: T) -> io::Result<()> {
        self.sock.write_all(value.encode().as_ref())
    }
}

impl<T: Wire> AsRawFd for BinPipe<T> {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.sock.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_both_directions() {
        let (mut tx, mut rx) = BinPipe::pair().unwrap();
        tx.write(42i32).unwrap();
        assert_eq!(rx.read().unwrap(), 42);
        rx.write(-23i32).unwrap();
        assert_eq!(tx.read().unwrap(), -23);
    }

    #[test]
    fn read_fails_after_peer_is_gone() {
        let (tx, mut rx) = BinPipe::<u8>::pair().unwrap();
        drop(tx);
        assert!(rx.read().is_err());
    }
}
