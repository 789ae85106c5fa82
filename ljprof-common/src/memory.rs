//! Fallible access to the observed process's memory.

/// A read that could not be completed.
///
/// Covers unmapped addresses, permission failures and values that cannot be
/// what the caller expected (null links, wrong object kinds).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryFault {
    pub addr: u64,
}

impl MemoryFault {
    #[must_use]
    pub const fn at(addr: u64) -> Self {
        Self { addr }
    }
}

/// Source of the target's memory.
///
/// Implemented by `bpf_probe_read_user` in the kernel, `/proc/<pid>/mem` in
/// userspace and in-memory images for tests. Integers are little-endian.
pub trait MemoryReader {
    /// Fills `buf` with the bytes at `addr`, or fails without partial results.
    ///
    /// # Errors
    /// Returns [`MemoryFault`] when any byte of the range is unreadable.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault>;

    /// Copies a NUL-terminated string into `buf`, always leaving it
    /// NUL-terminated. Returns the number of bytes before the terminator.
    ///
    /// # Errors
    /// Returns [`MemoryFault`] when the first byte is unreadable.
    fn read_c_str(&self, addr: u64, buf: &mut [u8]) -> Result<usize, MemoryFault> {
        let Some(limit) = buf.len().checked_sub(1) else {
            return Ok(0);
        };
        // One bulk read first, falling back to single bytes when the string
        // ends close to an unmapped page.
        let len = if self.read_bytes(addr, &mut buf[..limit]).is_ok() {
            buf[..limit].iter().position(|&b| b == 0).unwrap_or(limit)
        } else {
            let mut len = 0;
            while len < limit {
                let mut byte = [0u8; 1];
                match self.read_bytes(addr.wrapping_add(len as u64), &mut byte) {
                    Ok(()) if byte[0] != 0 => {
                        buf[len] = byte[0];
                        len += 1;
                    }
                    Ok(()) => break,
                    Err(fault) if len == 0 => return Err(fault),
                    Err(_) => break,
                }
            }
            len
        };
        buf[len] = 0;
        Ok(len)
    }

    /// # Errors
    /// Propagates the underlying read fault.
    fn read_u8(&self, addr: u64) -> Result<u8, MemoryFault> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// # Errors
    /// Propagates the underlying read fault.
    fn read_u32(&self, addr: u64) -> Result<u32, MemoryFault> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// # Errors
    /// Propagates the underlying read fault.
    fn read_i32(&self, addr: u64) -> Result<i32, MemoryFault> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// # Errors
    /// Propagates the underlying read fault.
    fn read_u64(&self, addr: u64) -> Result<u64, MemoryFault> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a 4- or 8-byte word, zero-extended.
    ///
    /// # Errors
    /// Faults on read failure or an unsupported width.
    fn read_word(&self, addr: u64, width: u32) -> Result<u64, MemoryFault> {
        match width {
            4 => self.read_u32(addr).map(u64::from),
            8 => self.read_u64(addr),
            _ => Err(MemoryFault::at(addr)),
        }
    }
}

impl<R: MemoryReader + ?Sized> MemoryReader for &R {
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        (**self).read_bytes(addr, buf)
    }

    fn read_c_str(&self, addr: u64, buf: &mut [u8]) -> Result<usize, MemoryFault> {
        (**self).read_c_str(addr, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Contiguous bytes starting at `base`.
    struct Flat {
        base: u64,
        bytes: &'static [u8],
    }

    impl MemoryReader for Flat {
        fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
            let start = addr.checked_sub(self.base).ok_or(MemoryFault::at(addr))? as usize;
            let src = self
                .bytes
                .get(start..start + buf.len())
                .ok_or(MemoryFault::at(addr))?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn test_words_are_little_endian() {
        let mem = Flat {
            base: 0x100,
            bytes: &[0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0],
        };
        assert_eq!(mem.read_u32(0x100), Ok(0x1234_5678));
        assert_eq!(mem.read_word(0x100, 8), Ok(0x1234_5678));
        assert_eq!(mem.read_word(0x100, 2), Err(MemoryFault::at(0x100)));
    }

    #[test]
    fn test_c_str_stops_at_end_of_mapping() {
        let mem = Flat {
            base: 0x100,
            bytes: b"@init.lua",
        };
        let mut buf = [0xffu8; 32];
        assert_eq!(mem.read_c_str(0x100, &mut buf), Ok(9));
        assert_eq!(&buf[..10], b"@init.lua\0");
    }

    #[test]
    fn test_c_str_truncates() {
        let mem = Flat {
            base: 0,
            bytes: b"abcdefgh\0",
        };
        let mut buf = [0u8; 4];
        assert_eq!(mem.read_c_str(0, &mut buf), Ok(3));
        assert_eq!(&buf, b"abc\0");
    }

    #[test]
    fn test_c_str_unreadable_start() {
        let mem = Flat {
            base: 0x100,
            bytes: b"x",
        };
        let mut buf = [0u8; 8];
        assert_eq!(mem.read_c_str(0x50, &mut buf), Err(MemoryFault::at(0x50)));
    }
}
