//! Extend Read and Write with some convenience methods for binary i/o
//!
use std::io::{self, Read, Write};

use crate::errors::Result;

pub(crate) trait Serialize: Sized {
    /// Write self to a stream
    fn write_to(&self, stream: &mut impl Write) -> Result<()>;

    /// Read Self from a stream
    fn read_from(stream: &mut impl Read) -> Result<Self>;
}

pub(crate) trait ExtendedRead: Read {
    /// Read a byte from a stream
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buffer = [0; 2];
        self.read_exact(&mut buffer)?;

        Ok(u16::from_be_bytes(buffer))
    }

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(u64::from_be_bytes(buffer))
    }

    /// Read a Big Endian encoded 64 bit float from a stream
    fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(f64::from_be_bytes(buffer))
    }

    /// Read a length prefixed UTF-8 string from a stream
    fn read_str(&mut self) -> io::Result<String> {
        let len = self.read_u16()?;
        let mut buffer = vec![0; len as usize];
        self.read_exact(&mut buffer)?;

        String::from_utf8(buffer).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Read a value preceded by a presence byte
    fn read_cell(&mut self) -> io::Result<Option<f64>> {
        let present = self.read_byte()?;
        let value = self.read_f64()?;

        Ok(if present == 0 { None } else { Some(value) })
    }
}

impl<R: Read> ExtendedRead for R {}

pub(crate) trait ExtendedWrite: Write {
    /// Write a byte to a stream
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    fn write_u16(&mut self, word: u16) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    fn write_u64(&mut self, word: u64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    /// Write a Big Endian encoded 64 bit float to a stream
    fn write_f64(&mut self, word: f64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    /// Write a length prefixed UTF-8 string to a stream
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        let len = u16::try_from(s.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string too long"))?;
        self.write_u16(len)?;
        self.write_all(s.as_bytes())
    }

    /// Write a value preceded by a presence byte. Absent values are written as NaN.
    fn write_cell(&mut self, value: Option<f64>) -> io::Result<()> {
        match value {
            Some(value) => {
                self.write_byte(1)?;
                self.write_f64(value)
            }
            None => {
                self.write_byte(0)?;
                self.write_f64(f64::NAN)
            }
        }
    }
}

impl<W: Write> ExtendedWrite for W {}
