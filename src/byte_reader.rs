use crate::error::ProtocolError;

/// Bounds-checked cursor over a borrowed byte slice. Every read that would run
/// past the end fails with `ProtocolError::Truncated` naming what was being read.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[cfg(test)]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_consumed(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn read_slice(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated(what));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N, what)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>(what)?[0])
    }

    pub fn read_u16_be(&mut self, what: &'static str) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.read_array(what)?))
    }

    pub fn read_u24_be(&mut self, what: &'static str) -> Result<u32, ProtocolError> {
        let [a, b, c] = self.read_array(what)?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn skip(&mut self, len: usize, what: &'static str) -> Result<(), ProtocolError> {
        self.read_slice(len, what).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian_fields() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u8("a").unwrap(), 0x01);
        assert_eq!(reader.read_u16_be("b").unwrap(), 0x0203);
        assert_eq!(reader.read_u24_be("c").unwrap(), 0x040506);
        assert!(reader.is_consumed());
    }

    #[test]
    fn test_overrun_is_truncated() {
        let data = [0x01, 0x02];
        let mut reader = ByteReader::new(&data);
        reader.skip(1, "first").unwrap();
        assert_eq!(
            reader.read_u16_be("length"),
            Err(ProtocolError::Truncated("length"))
        );
        // a failed read does not advance
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.remaining(), 1);
    }
}
