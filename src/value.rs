//! Word and DWord: the two machine value shapes.
//!
//! Every VM value occupies exactly one `Word` (4 bytes) or one `DWord`
//! (8 bytes = two stack slots). Both are plain bit containers; the accessors
//! reinterpret the same bits as signed/unsigned integers, floats, byte and
//! half-word lanes, or (for DWord) a data-arena address. Frame and stack
//! arithmetic depends on the exact sizes, hence `repr(transparent)`.

/// One stack slot: 32 bits, viewed as i32/u32/f32 or sub-word lanes.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Word(pub u32);

impl Word {
    pub const ZERO: Word = Word(0);

    #[inline]
    pub fn from_i32(v: i32) -> Word {
        Word(v as u32)
    }

    #[inline]
    pub fn from_u32(v: u32) -> Word {
        Word(v)
    }

    #[inline]
    pub fn from_f32(v: f32) -> Word {
        Word(v.to_bits())
    }

    #[inline]
    pub fn i32(self) -> i32 {
        self.0 as i32
    }

    #[inline]
    pub fn u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    /// Byte lane 0..=3 (little-endian).
    #[inline]
    pub fn byte(self, lane: usize) -> u8 {
        (self.0 >> (lane * 8)) as u8
    }

    #[inline]
    pub fn set_byte(self, lane: usize, v: u8) -> Word {
        let shift = lane * 8;
        Word((self.0 & !(0xFF << shift)) | ((v as u32) << shift))
    }

    /// Half-word lane 0..=1 (little-endian).
    #[inline]
    pub fn hword(self, lane: usize) -> u16 {
        (self.0 >> (lane * 16)) as u16
    }

    #[inline]
    pub fn set_hword(self, lane: usize, v: u16) -> Word {
        let shift = lane * 16;
        Word((self.0 & !(0xFFFF << shift)) | ((v as u32) << shift))
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Word({:#010x})", self.0)
    }
}

/// Two stack slots: 64 bits, viewed as i64/u64/f64, two Words, or an arena
/// address. On the value stack the low Word sits at the lower slot index.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct DWord(pub u64);

impl DWord {
    pub const ZERO: DWord = DWord(0);

    #[inline]
    pub fn from_i64(v: i64) -> DWord {
        DWord(v as u64)
    }

    #[inline]
    pub fn from_u64(v: u64) -> DWord {
        DWord(v)
    }

    #[inline]
    pub fn from_f64(v: f64) -> DWord {
        DWord(v.to_bits())
    }

    /// An address into the program's data arena.
    #[inline]
    pub fn from_addr(v: u64) -> DWord {
        DWord(v)
    }

    #[inline]
    pub fn from_words(lo: Word, hi: Word) -> DWord {
        DWord((lo.0 as u64) | ((hi.0 as u64) << 32))
    }

    #[inline]
    pub fn i64(self) -> i64 {
        self.0 as i64
    }

    #[inline]
    pub fn u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub fn addr(self) -> u64 {
        self.0
    }

    /// Word lane 0..=1 (little-endian: lane 0 is the low half).
    #[inline]
    pub fn word(self, lane: usize) -> Word {
        Word((self.0 >> (lane * 32)) as u32)
    }

    #[inline]
    pub fn lo(self) -> Word {
        Word(self.0 as u32)
    }

    #[inline]
    pub fn hi(self) -> Word {
        Word((self.0 >> 32) as u32)
    }
}

impl std::fmt::Debug for DWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DWord({:#018x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_reinterprets_bits() {
        let w = Word::from_f32(1.5);
        assert_eq!(w.f32(), 1.5);
        assert_eq!(w.u32(), 1.5f32.to_bits());
        assert_eq!(Word::from_i32(-1).u32(), u32::MAX);
    }

    #[test]
    fn word_lanes() {
        let w = Word::from_u32(0x4433_2211);
        assert_eq!(w.byte(0), 0x11);
        assert_eq!(w.byte(3), 0x44);
        assert_eq!(w.hword(1), 0x4433);
        assert_eq!(w.set_byte(0, 0xAA).u32(), 0x4433_22AA);
        assert_eq!(w.set_hword(1, 0xBEEF).u32(), 0xBEEF_2211);
    }

    #[test]
    fn dword_split_and_join() {
        let d = DWord::from_i64(-2);
        assert_eq!(DWord::from_words(d.lo(), d.hi()), d);
        assert_eq!(d.word(0), d.lo());
        assert_eq!(DWord::from_f64(2.5).f64(), 2.5);
    }
}
