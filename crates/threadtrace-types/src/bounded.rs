use std::fmt;

/// Inline UTF-8 string with a fixed byte capacity.
///
/// Construction never allocates, so a `BoundedStr` can be filled from signal
/// or exception handler context. Input longer than `N` bytes is cut at the
/// last character boundary that fits; invalid UTF-8 input is cut at the first
/// invalid sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedStr<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    pub fn from_str_truncated(value: &str) -> Self {
        let mut out = Self::new();
        out.set(value);
        out
    }

    pub fn from_bytes_truncated(bytes: &[u8]) -> Self {
        let window = &bytes[..bytes.len().min(N)];
        let valid = match std::str::from_utf8(window) {
            Ok(s) => s,
            Err(err) => {
                // Cut at the first invalid sequence; a multi-byte char split by
                // the window end lands here too.
                let (head, _) = window.split_at(err.valid_up_to());
                std::str::from_utf8(head).unwrap_or_default()
            }
        };
        Self::from_str_truncated(valid)
    }

    pub fn set(&mut self, value: &str) {
        let mut cut = value.len().min(N);
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf[..cut].copy_from_slice(&value.as_bytes()[..cut]);
        self.len = cut;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    /// `None` when empty.
    pub fn non_empty(&self) -> Option<&str> {
        if self.is_empty() {
            None
        } else {
            Some(self.as_str())
        }
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> PartialEq<str> for BoundedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for BoundedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_short_values_intact() {
        let s = BoundedStr::<32>::from_str_truncated("worker-3");
        assert_eq!(s, "worker-3");
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn truncates_on_char_boundary() {
        // "é" is two bytes; a 5-byte window would split the third one.
        let s = BoundedStr::<5>::from_str_truncated("ééé");
        assert_eq!(s.as_str(), "éé");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn invalid_bytes_cut_at_first_bad_sequence() {
        let s = BoundedStr::<16>::from_bytes_truncated(b"gmain\xffrest");
        assert_eq!(s.as_str(), "gmain");
    }

    #[test]
    fn byte_window_split_inside_char_is_dropped() {
        let s = BoundedStr::<3>::from_bytes_truncated("aé!".as_bytes());
        assert_eq!(s.as_str(), "aé");
        let s = BoundedStr::<2>::from_bytes_truncated("aé!".as_bytes());
        assert_eq!(s.as_str(), "a");
    }

    #[test]
    fn empty_maps_to_none() {
        let mut s = BoundedStr::<8>::from_str_truncated("x");
        assert_eq!(s.non_empty(), Some("x"));
        s.clear();
        assert_eq!(s.non_empty(), None);
    }
}
