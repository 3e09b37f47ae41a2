const U32_SIZE: usize = std::mem::size_of::<u32>();
const I32_SIZE: usize = std::mem::size_of::<i32>();

/// Writes big endian integers into a page buffer.
pub(in crate::storage) struct Serializer<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> Serializer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn serialize_u32(&mut self, val: u32) {
        self.buffer[self.pos..self.pos + U32_SIZE].copy_from_slice(val.to_be_bytes().as_slice());
        self.pos += U32_SIZE;
    }

    pub fn serialize_i32(&mut self, val: i32) {
        self.buffer[self.pos..self.pos + I32_SIZE].copy_from_slice(val.to_be_bytes().as_slice());
        self.pos += I32_SIZE;
    }

    pub fn end(self) -> usize {
        self.pos
    }
}

/// Reads big endian integers out of a page buffer.
pub(in crate::storage) struct Deserializer<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn deserialize_u32(&mut self) -> u32 {
        let mut bytes = [0u8; U32_SIZE];
        bytes.copy_from_slice(&self.buffer[self.pos..self.pos + U32_SIZE]);
        self.pos += U32_SIZE;
        u32::from_be_bytes(bytes)
    }

    pub fn deserialize_i32(&mut self) -> i32 {
        let mut bytes = [0u8; I32_SIZE];
        bytes.copy_from_slice(&self.buffer[self.pos..self.pos + I32_SIZE]);
        self.pos += I32_SIZE;
        i32::from_be_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {

    use super::{Deserializer, Serializer};

    #[test]
    fn integers_are_big_endian() {
        let mut buffer = [0u8; 8];
        let mut serializer = Serializer::new(&mut buffer);
        serializer.serialize_u32(0x0102_0304);
        serializer.serialize_i32(-1);
        assert_eq!(serializer.end(), 8);
        assert_eq!(buffer, [1, 2, 3, 4, 0xff, 0xff, 0xff, 0xff]);

        let mut deserializer = Deserializer::new(&buffer);
        assert_eq!(deserializer.deserialize_u32(), 0x0102_0304);
        assert_eq!(deserializer.deserialize_i32(), -1);
    }
}
