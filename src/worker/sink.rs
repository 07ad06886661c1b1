use crate::fs::OutputFile;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{self, BufWriter, Read, Write};

type Buffered = BufWriter<Box<dyn OutputFile>>;

/// Write side of a worker's file, optionally gzip-compressed
pub(crate) enum Sink {
    Plain(Buffered),
    Gzip(GzEncoder<Buffered>),
}

impl Sink {
    pub(crate) fn new(
        file: Box<dyn OutputFile>,
        compression: Option<Compression>,
        buffer_size: usize,
    ) -> Self {
        let buffered = BufWriter::with_capacity(buffer_size, file);
        match compression {
            Some(level) => Sink::Gzip(GzEncoder::new(buffered, level)),
            None => Sink::Plain(buffered),
        }
    }

    fn buffered(&mut self) -> &mut Buffered {
        match self {
            Sink::Plain(buffered) => buffered,
            Sink::Gzip(encoder) => encoder.get_mut(),
        }
    }

    /// Copy the whole body then sync the file. Returns bytes consumed from `body`.
    pub(crate) fn append(&mut self, body: &mut dyn Read) -> io::Result<u64> {
        let copied = match self {
            Sink::Plain(buffered) => io::copy(body, buffered)?,
            Sink::Gzip(encoder) => io::copy(body, encoder)?,
        };
        self.sync()?;
        Ok(copied)
    }

    /// Push buffered bytes to the file and sync it. Gzip state still held by
    /// the encoder is only written by [`Sink::finish`].
    pub(crate) fn sync(&mut self) -> io::Result<()> {
        let buffered = self.buffered();
        buffered.flush()?;
        buffered.get_mut().sync()
    }

    /// Write the gzip trailer (if any), sync and close the file
    pub(crate) fn finish(self) -> io::Result<()> {
        let mut buffered = match self {
            Sink::Plain(buffered) => buffered,
            Sink::Gzip(encoder) => encoder.finish()?,
        };
        buffered.flush()?;
        let mut file = buffered.into_inner().map_err(|err| err.into_error())?;
        file.sync()?;
        file.close()
    }
}
