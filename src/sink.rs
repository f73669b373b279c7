//! Destinations an archive can be written to
//!
//! A destination is any [`Write`]. Whether it can also seek back to patch a local
//! header is a capability carried by [`ArchiveSink::can_seek`]; nothing ever seeks
//! a destination that does not advertise it.

use std::fs::File;
use std::io::{self, Cursor, Seek, SeekFrom, Write};

/// A writable archive destination with an optional seek capability
pub trait ArchiveSink: Write {
    /// Whether [`seek_to`](Self::seek_to) may be used
    fn can_seek(&self) -> bool {
        false
    }

    /// Move to an absolute position
    fn seek_to(&mut self, _pos: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "destination is not seekable",
        ))
    }

    /// Absolute position of the first byte the archive will write
    fn start_position(&mut self) -> io::Result<u64> {
        Ok(0)
    }
}

/// Destinations that can drop everything after a given length
pub trait Truncate {
    fn truncate_at(&mut self, len: u64) -> io::Result<()>;
}

/// Marks any `Write + Seek` as a seek-capable destination
#[derive(Debug)]
pub struct Seekable<W>(pub W);

/// Hides the seek capability of a destination, forcing data descriptors
#[derive(Debug)]
pub struct ForwardOnly<W>(pub W);

impl<W> Seekable<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W> ForwardOnly<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write> Write for Seekable<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: io::Read> io::Read for Seekable<W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<W: Seek> Seek for Seekable<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<W: Write + Seek> ArchiveSink for Seekable<W> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn start_position(&mut self) -> io::Result<u64> {
        self.0.stream_position()
    }
}

impl<W: Truncate> Truncate for Seekable<W> {
    fn truncate_at(&mut self, len: u64) -> io::Result<()> {
        self.0.truncate_at(len)
    }
}

impl<W: Write> Write for ForwardOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> ArchiveSink for ForwardOnly<W> {}

impl ArchiveSink for File {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn start_position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl Truncate for File {
    fn truncate_at(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl ArchiveSink for Cursor<Vec<u8>> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.set_position(pos);
        Ok(())
    }

    fn start_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate_at(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

impl ArchiveSink for Cursor<&mut Vec<u8>> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.set_position(pos);
        Ok(())
    }

    fn start_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }
}

impl ArchiveSink for Vec<u8> {}

impl ArchiveSink for io::Sink {}

impl<S: ArchiveSink + ?Sized> ArchiveSink for &mut S {
    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        (**self).seek_to(pos)
    }

    fn start_position(&mut self) -> io::Result<u64> {
        (**self).start_position()
    }
}

/// Reports how many bytes a writer has put out so far (its absolute position)
pub trait Tell {
    fn tell(&self) -> u64;
}

impl<T: Tell + ?Sized> Tell for &mut T {
    fn tell(&self) -> u64 {
        (**self).tell()
    }
}

/// A destination that discards everything and only counts bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCounter {
    count: u64,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArchiveSink for ByteCounter {}

impl Tell for ByteCounter {
    fn tell(&self) -> u64 {
        self.count
    }
}

/// Wraps a destination and keeps track of the absolute write position
#[derive(Debug)]
pub(crate) struct PositionWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> PositionWriter<W> {
    pub(crate) fn new(inner: W, position: u64) -> Self {
        Self { inner, position }
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> Tell for PositionWriter<W> {
    fn tell(&self) -> u64 {
        self.position
    }
}

impl<W: ArchiveSink> PositionWriter<W> {
    pub(crate) fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    pub(crate) fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek_to(pos)?;
        self.position = pos;
        Ok(())
    }
}

impl<W: Write> Write for PositionWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
