use std::{
    io::{self, Cursor, Read, Write},
    net::{Shutdown, TcpStream},
};

/// A byte source a shaper can wrap.
///
/// On top of [`Read`], a source must be able to tell how many bytes can be read right now
/// without blocking. Shapers driven by a clock only ever pull that many bytes on a tick, so a
/// slow source never stalls the clock.
pub trait Source: Read {
    /// Returns the number of bytes that can be read without blocking. `0` means either that no
    /// data is buffered yet or that the source reached its end; the two cannot be told apart
    /// without a blocking read.
    fn available(&mut self) -> io::Result<usize>;

    /// Closes the source. Subsequent reads may fail.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A byte sink a shaper can wrap: [`Write`] plus an explicit close.
pub trait Sink: Write {
    /// Flushes and closes the sink.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Source for &[u8] {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.len())
    }
}

impl<T: AsRef<[u8]>> Source for Cursor<T> {
    fn available(&mut self) -> io::Result<usize> {
        let len = self.get_ref().as_ref().len() as u64;
        Ok(len.saturating_sub(self.position()) as usize)
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl Sink for Vec<u8> {}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl Source for TcpStream {
    #[cfg(unix)]
    fn available(&mut self) -> io::Result<usize> {
        use std::os::fd::AsRawFd;

        let mut pending: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int into `pending`.
        let rc = unsafe { libc::ioctl(self.as_raw_fd(), libc::FIONREAD, &mut pending as *mut libc::c_int) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(pending.max(0) as usize)
    }

    #[cfg(not(unix))]
    fn available(&mut self) -> io::Result<usize> {
        let mut probe = [0u8; 64 * 1024];

        self.set_nonblocking(true)?;
        let peeked = self.peek(&mut probe);
        self.set_nonblocking(false)?;

        match peeked {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Read) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl Sink for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.flush()?;
        match self.shutdown(Shutdown::Write) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
