//! Positioned, endianness-aware reads over an in-memory blob.

use std::mem::size_of;

use scroll::ctx::TryFromCtx;
use scroll::Endian;
use scroll::Pread as _;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::FileRange;
use crate::error::Result;

/// Cursor over a byte slice with an endianness switch.
///
/// Multi-byte reads honor the configured endianness. Reads past the end of
/// the slice and out-of-range seeks fail with `IoError` carrying the range
/// of the failed access; the reader does not interpret content.
#[derive(Debug)]
pub(crate) struct ByteReader<'data> {
    data: &'data [u8],
    offset: usize,
    endian: Endian,
}

impl<'data> ByteReader<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            offset: 0,
            endian: Endian::Little,
        }
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(Error::with_range(
                ErrorKind::IoError,
                FileRange { offset, size: 0 },
            ));
        }
        self.offset = offset as usize;
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    /// Decodes a fixed-layout value at the cursor and advances past it.
    pub fn read<T>(&mut self) -> Result<T>
    where
        T: TryFromCtx<'data, Endian, Error = scroll::Error>,
    {
        let start = self.offset as u64;
        self.data.gread_with(&mut self.offset, self.endian).map_err(|_| {
            Error::with_range(
                ErrorKind::IoError,
                FileRange {
                    offset: start,
                    size: size_of::<T>(),
                },
            )
        })
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.read()
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.read()
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.read()
    }

    #[allow(dead_code)]
    pub fn u64(&mut self) -> Result<u64> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endianness_switch() {
        let data = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u32().unwrap(), 0x0403_0201);
        assert_eq!(reader.offset(), 4);

        reader.seek(0).unwrap();
        reader.set_endian(Endian::Big);
        assert_eq!(reader.u16().unwrap(), 0x0102);
        assert_eq!(reader.u64().unwrap_err().kind(), ErrorKind::IoError);
    }

    #[test]
    fn read_past_end() {
        let data = [0u8; 3];
        let mut reader = ByteReader::new(&data);

        let err = reader.u32().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(err.range(), Some(FileRange { offset: 0, size: 4 }));

        assert_eq!(reader.seek(4).unwrap_err().kind(), ErrorKind::IoError);
        reader.seek(3).unwrap();
        assert_eq!(reader.u8().unwrap_err().kind(), ErrorKind::IoError);
    }
}
