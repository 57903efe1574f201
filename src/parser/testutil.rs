//! Bit stream builders for tests.

use bitbuffer::{BitWriteStream, LittleEndian};

#[derive(Debug, Default)]
pub struct DeltaWriter {
    ops: Vec<(u32, usize)>,
}

impl DeltaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit(&mut self, value: bool) -> &mut Self {
        self.ops.push((value as u32, 1));
        self
    }

    pub fn int(&mut self, value: u32, bits: usize) -> &mut Self {
        let masked = if bits >= 32 {
            value
        } else {
            value & ((1u32 << bits) - 1)
        };
        self.ops.push((masked, bits));
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.int(value.len() as u32, 9);
        for byte in value.bytes() {
            self.int(byte as u32, 8);
        }
        self
    }

    pub fn float(&mut self, value: f32) -> &mut Self {
        self.int(value.to_bits(), 32)
    }

    pub fn ubit_int(&mut self, value: u32) -> &mut Self {
        if value < 16 {
            self.int(value, 6)
        } else if value < 256 {
            self.int((value & 15) | 16, 6).int(value >> 4, 4)
        } else if value < 4096 {
            self.int((value & 15) | 32, 6).int(value >> 4, 8)
        } else {
            self.int((value & 15) | 48, 6).int(value >> 4, 28)
        }
    }

    /// Encode an ascending list of field indices followed by the end marker.
    pub fn indices(&mut self, indices: &[usize], new_way: bool) -> &mut Self {
        self.bit(new_way);
        let mut last: i64 = -1;
        for &index in indices {
            let delta = (index as i64 - last - 1) as u32;
            self.index_delta(delta, new_way);
            last = index as i64;
        }
        self.index_delta(0xFFF, new_way)
    }

    fn index_delta(&mut self, delta: u32, new_way: bool) -> &mut Self {
        if new_way {
            if delta == 0 {
                return self.bit(true);
            }
            self.bit(false);
            if delta < 8 {
                return self.bit(true).int(delta, 3);
            }
            self.bit(false);
        }

        if delta < 32 {
            self.int(delta, 7)
        } else if delta < 128 {
            self.int((delta & 31) | 32, 7).int(delta >> 5, 2)
        } else if delta < 512 {
            self.int((delta & 31) | 64, 7).int(delta >> 5, 4)
        } else {
            self.int((delta & 31) | 96, 7).int(delta >> 5, 7)
        }
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut data = Vec::new();
        {
            let mut out = BitWriteStream::new(&mut data, LittleEndian);
            for &(value, bits) in &self.ops {
                if bits > 0 {
                    out.write_int(value, bits).expect("write bits");
                }
            }
            // pad so trailing reads of a few bits never see end of data
            out.write_int(0u32, 32).expect("write padding");
        }
        data
    }
}
