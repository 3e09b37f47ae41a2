/// Width of one bitmap word in bits.
const BITMAP_WIDTH: usize = u8::BITS as usize;

/// Locates set bits in an occupancy bitmap.
///
/// Positions are bit indices; `limit` is the exclusive upper bound of the search
/// and never lies past the end of the bitmap.
pub trait BitSearch {
    /// Returns the first set bit in `[start, limit)`.
    fn first_set_at_or_after(&self, bitmap: &[u8], start: usize, limit: usize) -> Option<usize>;

    /// Returns the first set bit in `[0, limit)`.
    fn first_set(&self, bitmap: &[u8], limit: usize) -> Option<usize> {
        self.first_set_at_or_after(bitmap, 0, limit)
    }
}

/// Fixed-width bitmap stored in a byte slice, least significant bit first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bitmap;

impl Bitmap {
    /// Number of bytes needed for a bitmap holding `bits` bits.
    pub fn size_for(bits: usize) -> usize {
        (bits + BITMAP_WIDTH - 1) / BITMAP_WIDTH
    }

    pub fn init(bitmap: &mut [u8]) {
        bitmap.fill(0);
    }

    pub fn set(bitmap: &mut [u8], pos: usize) {
        bitmap[pos / BITMAP_WIDTH] |= mask(pos);
    }

    pub fn reset(bitmap: &mut [u8], pos: usize) {
        bitmap[pos / BITMAP_WIDTH] &= !mask(pos);
    }

    pub fn is_set(bitmap: &[u8], pos: usize) -> bool {
        bitmap[pos / BITMAP_WIDTH] & mask(pos) != 0
    }

    /// Returns the first bit in `[0, limit)` which is not set.
    pub fn first_unset(bitmap: &[u8], limit: usize) -> Option<usize> {
        let mut pos = 0;
        while pos < limit {
            let byte = !bitmap[pos / BITMAP_WIDTH] >> (pos % BITMAP_WIDTH);
            if byte == 0 {
                pos = (pos / BITMAP_WIDTH + 1) * BITMAP_WIDTH;
                continue;
            }
            let found = pos + byte.trailing_zeros() as usize;
            return (found < limit).then_some(found);
        }
        None
    }

    /// Number of set bits in `[0, limit)`.
    pub fn count(bitmap: &[u8], limit: usize) -> usize {
        (0..limit).filter(|&pos| Self::is_set(bitmap, pos)).count()
    }
}

fn mask(pos: usize) -> u8 {
    1 << (pos % BITMAP_WIDTH)
}

impl BitSearch for Bitmap {
    fn first_set_at_or_after(&self, bitmap: &[u8], start: usize, limit: usize) -> Option<usize> {
        let mut pos = start;
        while pos < limit {
            let byte = bitmap[pos / BITMAP_WIDTH] >> (pos % BITMAP_WIDTH);
            if byte == 0 {
                // nothing left in this byte
                pos = (pos / BITMAP_WIDTH + 1) * BITMAP_WIDTH;
                continue;
            }
            let found = pos + byte.trailing_zeros() as usize;
            return (found < limit).then_some(found);
        }
        None
    }
}
