//! Register images built during register generation.

use crate::HalError;
use byteorder::{ByteOrder, LittleEndian};

/// A block of 32-bit registers, serialised little-endian for the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegSet {
    words: Vec<u32>,
}

impl RegSet {
    /// `count` zeroed registers.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            words: vec![0; count],
        }
    }

    /// Number of registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether there are no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Register `idx`, zero if out of range.
    #[must_use]
    pub fn get(&self, idx: usize) -> u32 {
        self.words.get(idx).copied().unwrap_or(0)
    }

    /// Set register `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if `idx` is out of range.
    pub fn set(&mut self, idx: usize, val: u32) -> Result<(), HalError> {
        let len = self.words.len();
        let word = self
            .words
            .get_mut(idx)
            .ok_or_else(|| HalError::InvalidArgument(format!("register {idx} of {len}")))?;
        *word = val;
        Ok(())
    }

    /// Replace `width` bits of register `idx` starting at `shift`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if `idx` is out of range or the
    /// field does not fit in 32 bits.
    pub fn set_bits(&mut self, idx: usize, shift: u32, width: u32, val: u32) -> Result<(), HalError> {
        if width == 0 || shift.checked_add(width).is_none_or(|end| end > 32) {
            return Err(HalError::InvalidArgument(format!(
                "field of {width} bits at {shift}"
            )));
        }
        let mask = (u32::MAX >> (32 - width)) << shift;
        let cur = self.get(idx);
        self.set(idx, (cur & !mask) | ((val << shift) & mask))
    }

    /// Copy `bytes` into consecutive registers from `start`, zero-padding the
    /// last word.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if the bytes do not fit.
    pub fn load(&mut self, start: usize, bytes: &[u8]) -> Result<(), HalError> {
        let need = bytes.len().div_ceil(4);
        let room = self.words.len().saturating_sub(start);
        if need > room {
            return Err(HalError::InvalidArgument(format!(
                "{} bytes of syntax do not fit in {room} registers",
                bytes.len()
            )));
        }
        for (word, chunk) in self.words[start..start + need].iter_mut().zip(bytes.chunks(4)) {
            let mut padded = [0u8; 4];
            padded[..chunk.len()].copy_from_slice(chunk);
            *word = LittleEndian::read_u32(&padded);
        }
        Ok(())
    }

    /// Little-endian byte image of every register.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; self.words.len() * 4];
        LittleEndian::write_u32_into(&self.words, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_fields_do_not_clobber_neighbours() {
        let mut regs = RegSet::new(2);
        regs.set(1, 0xffff_0000).unwrap();
        regs.set_bits(1, 4, 4, 0xa).unwrap();
        assert_eq!(regs.get(1), 0xffff_00a0);
        regs.set_bits(1, 28, 4, 0x15).unwrap();
        assert_eq!(regs.get(1), 0x5fff_00a0);
        assert!(regs.set_bits(1, 30, 4, 0).is_err());
        assert!(regs.set(2, 0).is_err());
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let mut regs = RegSet::new(1);
        for (shift, width) in [(u32::MAX, 1), (1, u32::MAX), (31, 2), (0, 33), (4, 0)] {
            assert!(
                matches!(regs.set_bits(0, shift, width, 0), Err(HalError::InvalidArgument(_))),
                "shift {shift} width {width}"
            );
        }
        regs.set_bits(0, 31, 1, 1).unwrap();
        assert_eq!(regs.get(0), 0x8000_0000);
    }

    #[test]
    fn load_pads_and_bounds_checks() {
        let mut regs = RegSet::new(3);
        regs.load(1, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(regs.get(1), 0x0403_0201);
        assert_eq!(regs.get(2), 0x0000_0005);
        assert!(regs.load(2, &[0; 5]).is_err());
    }

    #[test]
    fn byte_image_is_little_endian() {
        let mut regs = RegSet::new(2);
        regs.set(0, 0x1122_3344).unwrap();
        assert_eq!(regs.to_bytes(), vec![0x44, 0x33, 0x22, 0x11, 0, 0, 0, 0]);
    }
}
