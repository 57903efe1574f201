use crate::Result;
use bitbuffer::{BitError, BitReadStream, LittleEndian};

/// Bit level reads the decoder relies on.
///
/// Source demos pack everything least significant bit first, which is what
/// the `bitbuffer` little endian stream provides.
pub trait BitSource {
    fn read_bit(&mut self) -> Result<bool>;

    fn read_int(&mut self, bits: usize) -> Result<u32>;

    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>>;

    fn bits_left(&self) -> usize;

    fn read_signed_int(&mut self, bits: usize) -> Result<i32> {
        if bits == 0 {
            return Ok(0);
        }
        if bits > 32 {
            return Err(BitError::TooManyBits {
                requested: bits,
                max: 32,
            }
            .into());
        }
        let raw = self.read_int(bits)?;
        let shift = 32 - bits as u32;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// The variable width index used by packet entity headers.
    fn read_ubit_int(&mut self) -> Result<u32> {
        let ret = self.read_int(6)?;
        Ok(match ret & (16 | 32) {
            16 => (ret & 15) | (self.read_int(4)? << 4),
            32 => (ret & 15) | (self.read_int(8)? << 4),
            48 => (ret & 15) | (self.read_int(32 - 4)? << 4),
            _ => ret,
        })
    }

    fn read_varint32(&mut self) -> Result<u32> {
        let mut result = 0u32;
        for count in 0..5 {
            let byte = self.read_int(8)?;
            result |= (byte & 0x7F) << (7 * count);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    fn read_signed_varint32(&mut self) -> Result<i32> {
        let n = self.read_varint32()?;
        Ok((n >> 1) as i32 ^ -((n & 1) as i32))
    }
}

impl BitSource for BitReadStream<'_, LittleEndian> {
    fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bool()?)
    }

    fn read_int(&mut self, bits: usize) -> Result<u32> {
        if bits == 0 {
            return Ok(0);
        }
        Ok(BitReadStream::read_int::<u32>(self, bits)?)
    }

    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        Ok(BitReadStream::read_bytes(self, count)?.into_owned())
    }

    fn bits_left(&self) -> usize {
        BitReadStream::bits_left(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParseError;
    use bitbuffer::{BitReadBuffer, BitWriteStream};

    fn stream(data: &[u8]) -> BitReadStream<'_, LittleEndian> {
        BitReadStream::new(BitReadBuffer::new(data, LittleEndian))
    }

    #[test]
    fn signed_ints_are_sign_extended() {
        let mut data = Vec::new();
        {
            let mut out = BitWriteStream::new(&mut data, LittleEndian);
            out.write_int(0b11011u32, 5).unwrap();
            out.write_int(0b01011u32, 5).unwrap();
        }
        let mut s = stream(&data);
        assert_eq!(s.read_signed_int(5).unwrap(), -5);
        assert_eq!(s.read_signed_int(5).unwrap(), 11);
    }

    #[test]
    fn oversized_signed_int_is_an_error() {
        let data = [0xFFu8; 8];
        let mut s = stream(&data);
        assert!(matches!(
            s.read_signed_int(40),
            Err(ParseError::Bits(BitError::TooManyBits { requested: 40, .. }))
        ));
    }

    #[test]
    fn ubit_int_escapes() {
        let mut data = Vec::new();
        {
            let mut out = BitWriteStream::new(&mut data, LittleEndian);
            // small value, no escape
            out.write_int(9u32, 6).unwrap();
            // escape 16 carries four more bits
            out.write_int(16u32 | 3, 6).unwrap();
            out.write_int(0xAu32, 4).unwrap();
            // escape 32 carries eight more bits
            out.write_int(32u32 | 1, 6).unwrap();
            out.write_int(0xFFu32, 8).unwrap();
        }
        let mut s = stream(&data);
        assert_eq!(s.read_ubit_int().unwrap(), 9);
        assert_eq!(s.read_ubit_int().unwrap(), 0xA3);
        assert_eq!(s.read_ubit_int().unwrap(), 0xFF1);
    }

    #[test]
    fn varints() {
        let data = [0xAC, 0x02, 0x03];
        let mut s = stream(&data);
        assert_eq!(s.read_varint32().unwrap(), 300);
        assert_eq!(s.read_signed_varint32().unwrap(), -2);
    }

    #[test]
    fn running_dry_is_end_of_data() {
        let data = [0xFF];
        let mut s = stream(&data);
        BitSource::read_int(&mut s, 6).unwrap();
        assert!(matches!(BitSource::read_int(&mut s, 6), Err(ParseError::EndOfData)));
    }
}
