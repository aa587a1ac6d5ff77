use bitflags::bitflags;

bitflags! {
    /// Flags requested when binding a capture projection to a surface.
    ///
    /// Bit values match the platform's virtual display flag constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VirtualDisplayFlags: u32 {
        /// Content may be shown on a presentation-capable sink.
        const PRESENTATION = 1 << 1;
        /// Only content explicitly placed on the display is shown.
        const OWN_CONTENT_ONLY = 1 << 3;
        /// Mirror the default display when no own content exists.
        const AUTO_MIRROR = 1 << 4;
        /// Fast path for system-trusted displays; needs an extra permission.
        const TRUSTED = 1 << 10;
    }
}

impl VirtualDisplayFlags {
    /// The same request without the trusted fast path.
    pub fn untrusted(self) -> Self {
        self.difference(Self::TRUSTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_clears_only_trusted() {
        let flags = VirtualDisplayFlags::AUTO_MIRROR
            | VirtualDisplayFlags::PRESENTATION
            | VirtualDisplayFlags::TRUSTED;
        let stripped = flags.untrusted();
        assert!(!stripped.contains(VirtualDisplayFlags::TRUSTED));
        assert!(
            stripped.contains(VirtualDisplayFlags::AUTO_MIRROR | VirtualDisplayFlags::PRESENTATION)
        );
    }

    #[test]
    fn bit_values() {
        assert_eq!(VirtualDisplayFlags::AUTO_MIRROR.bits(), 16);
        assert_eq!(VirtualDisplayFlags::TRUSTED.bits(), 1024);
    }
}
