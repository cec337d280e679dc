//! Composable mode bits passed by callers when opening a blob.

use bitflags::bitflags;

bitflags! {
    /// Access mode requested by a caller. Bits compose; `RDONLY | WRONLY` is
    /// normalized to `RDWR` on the way in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u32 {
        /// Read access.
        const RDONLY = 1 << 0;
        /// Write access.
        const WRONLY = 1 << 1;
        /// Read and write access.
        const RDWR = 1 << 2;
        /// Hint that this source backs a font program.
        const FONT = 1 << 3;
        /// Exclusive access: no other handle may share the entry.
        const EXCL = 1 << 4;
        /// Forwarded to the source methods, not otherwise interpreted.
        const APPEND = 1 << 5;
        /// Forwarded to the source methods, not otherwise interpreted.
        const TRUNC = 1 << 6;
        /// Forwarded to the source methods, not otherwise interpreted.
        const CREAT = 1 << 7;
    }
}

impl ModeFlags {
    /// The bits a caller may legally set; anything else is `Invalid`.
    pub const KNOWN: ModeFlags = ModeFlags::RDONLY
        .union(ModeFlags::WRONLY)
        .union(ModeFlags::RDWR)
        .union(ModeFlags::FONT)
        .union(ModeFlags::EXCL)
        .union(ModeFlags::APPEND)
        .union(ModeFlags::TRUNC)
        .union(ModeFlags::CREAT);

    /// Replace `RDONLY | WRONLY` with `RDWR`, per spec.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.contains(ModeFlags::RDONLY) && self.contains(ModeFlags::WRONLY) {
            self.remove(ModeFlags::RDONLY | ModeFlags::WRONLY);
            self.insert(ModeFlags::RDWR);
        }
        self
    }

    /// `true` iff every set bit is one of the eight known mode bits.
    pub fn is_known(self) -> bool {
        ModeFlags::KNOWN.contains(self)
    }

    /// `true` if this mode permits reading (`RDONLY` or `RDWR`).
    pub fn readable(self) -> bool {
        self.contains(ModeFlags::RDONLY) || self.contains(ModeFlags::RDWR)
    }

    /// `true` if this mode permits writing (`WRONLY` or `RDWR`).
    pub fn writable(self) -> bool {
        self.contains(ModeFlags::WRONLY) || self.contains(ModeFlags::RDWR)
    }

    /// Widen `self` with `other`'s write access if it adds any (used when
    /// merging a reopen request with a stored mode).
    #[must_use]
    pub fn widen_write(self, other: ModeFlags) -> Self {
        if other.writable() && !self.writable() {
            (self | other).normalize()
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_merges_rdonly_and_wronly() {
        let m = (ModeFlags::RDONLY | ModeFlags::WRONLY).normalize();
        assert!(m.contains(ModeFlags::RDWR));
        assert!(!m.contains(ModeFlags::RDONLY));
        assert!(!m.contains(ModeFlags::WRONLY));
    }

    #[test]
    fn normalize_is_noop_otherwise() {
        let m = ModeFlags::RDONLY.normalize();
        assert_eq!(m, ModeFlags::RDONLY);
    }

    #[test]
    fn readable_writable() {
        assert!(ModeFlags::RDONLY.readable());
        assert!(!ModeFlags::RDONLY.writable());
        assert!(ModeFlags::RDWR.readable());
        assert!(ModeFlags::RDWR.writable());
        assert!(ModeFlags::WRONLY.writable());
        assert!(!ModeFlags::WRONLY.readable());
    }

    #[test]
    fn is_known_rejects_foreign_bits() {
        let bogus = ModeFlags::from_bits_retain(1 << 30);
        assert!(!bogus.is_known());
        assert!(ModeFlags::RDWR.is_known());
    }

    #[test]
    fn widen_write_adds_write_and_normalizes() {
        let stored = ModeFlags::RDONLY;
        let widened = stored.widen_write(ModeFlags::WRONLY);
        assert!(widened.contains(ModeFlags::RDWR));
    }

    #[test]
    fn widen_write_noop_when_already_writable() {
        let stored = ModeFlags::RDWR;
        assert_eq!(stored.widen_write(ModeFlags::WRONLY), ModeFlags::RDWR);
    }
}
