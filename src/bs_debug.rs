use std::fmt;

/// Alternate implementation of `fmt::Debug` for byte slice.
///
/// Standard `Debug` implementation for `[u8]` is comma separated
/// list of numbers. Since large amount of byte strings are in fact
/// ASCII strings or contain a lot of ASCII strings (e. g. HTTP),
/// it is convenient to print strings as ASCII when possible.
pub(crate) struct BsDebug<'a>(pub(crate) &'a [u8]);

impl<'a> fmt::Debug for BsDebug<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(fmt, "b\"")?;
        for &c in self.0 {
            // ASCII printable
            if (0x20..0x7f).contains(&c) {
                write!(fmt, "{}", c as char)?;
            } else {
                write!(fmt, "\\x{:02x}", c)?;
            }
        }
        write!(fmt, "\"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BsDebug;

    #[test]
    fn test_debug() {
        let vec: Vec<u8> = (0..0x100)
            .map(|b| b as u8)
            .collect();
        let debug = format!("{:?}", BsDebug(&vec));
        assert!(debug.starts_with("b\"\\x00"));
        assert!(debug.contains("ABCDEF"));
    }
}
