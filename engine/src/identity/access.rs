use super::wow64::Wow64Option;
use bitflags::bitflags;

bitflags! {
    /// REGSAM access mask as passed to `RegOpenKeyEx` / `NtOpenKey`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyAccess: u32 {
        const QUERY_VALUE = 0x0001;
        const SET_VALUE = 0x0002;
        const CREATE_SUB_KEY = 0x0004;
        const ENUMERATE_SUB_KEYS = 0x0008;
        const NOTIFY = 0x0010;
        const CREATE_LINK = 0x0020;
        const WOW64_64KEY = 0x0100;
        const WOW64_32KEY = 0x0200;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const MAXIMUM_ALLOWED = 0x0200_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;

        const KEY_READ = Self::READ_CONTROL.bits()
            | Self::QUERY_VALUE.bits()
            | Self::ENUMERATE_SUB_KEYS.bits()
            | Self::NOTIFY.bits();
        const KEY_WRITE = Self::READ_CONTROL.bits()
            | Self::SET_VALUE.bits()
            | Self::CREATE_SUB_KEY.bits();
        const KEY_ALL_ACCESS = 0x000F_003F;

        /// Every bit that lets a handle modify the key or its values.
        const WRITE_MASK = Self::SET_VALUE.bits()
            | Self::CREATE_SUB_KEY.bits()
            | Self::CREATE_LINK.bits()
            | Self::DELETE.bits()
            | Self::WRITE_DAC.bits()
            | Self::WRITE_OWNER.bits()
            | Self::MAXIMUM_ALLOWED.bits()
            | Self::GENERIC_ALL.bits()
            | Self::GENERIC_WRITE.bits();
    }
}

impl KeyAccess {
    /// Keeps unknown bits so the mask can be handed back unchanged.
    pub fn from_raw(mask: u32) -> Self {
        Self::from_bits_retain(mask)
    }

    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_MASK)
    }

    pub fn is_read_only(self) -> bool {
        !self.is_write()
    }

    /// The same request with every modifying bit cleared. An empty result
    /// becomes `KEY_READ` so the handle is still usable.
    pub fn read_only(self) -> Self {
        let relaxed = self.difference(Self::WRITE_MASK);
        let rights = relaxed.difference(Self::WOW64_32KEY | Self::WOW64_64KEY);
        if rights.is_empty() {
            relaxed | Self::KEY_READ
        } else {
            relaxed
        }
    }

    pub fn wow64_option(self) -> Wow64Option {
        if self.contains(Self::WOW64_32KEY) {
            Wow64Option::Force32
        } else if self.contains(Self::WOW64_64KEY) {
            Wow64Option::Force64
        } else {
            Wow64Option::Unspecified
        }
    }

    pub fn allows_query(self) -> bool {
        self.intersects(
            Self::QUERY_VALUE | Self::GENERIC_READ | Self::GENERIC_ALL | Self::MAXIMUM_ALLOWED,
        )
    }

    pub fn allows_set_value(self) -> bool {
        self.intersects(
            Self::SET_VALUE | Self::GENERIC_WRITE | Self::GENERIC_ALL | Self::MAXIMUM_ALLOWED,
        )
    }

    pub fn allows_enumerate(self) -> bool {
        self.intersects(
            Self::ENUMERATE_SUB_KEYS
                | Self::GENERIC_READ
                | Self::GENERIC_ALL
                | Self::MAXIMUM_ALLOWED,
        )
    }

    pub fn allows_delete(self) -> bool {
        self.intersects(Self::DELETE | Self::GENERIC_ALL | Self::MAXIMUM_ALLOWED)
    }

    pub fn allows_write_dac(self) -> bool {
        self.intersects(Self::WRITE_DAC | Self::GENERIC_ALL | Self::MAXIMUM_ALLOWED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_mask_is_not_write() {
        assert!(KeyAccess::KEY_READ.is_read_only());
        assert!(KeyAccess::KEY_WRITE.is_write());
        assert!(KeyAccess::KEY_ALL_ACCESS.is_write());
        assert!(KeyAccess::from_raw(0x0002_0019).is_read_only());
    }

    #[test]
    fn relaxing_keeps_the_view() {
        let relaxed = (KeyAccess::KEY_ALL_ACCESS | KeyAccess::WOW64_32KEY).read_only();
        assert!(relaxed.is_read_only());
        assert!(relaxed.allows_query());
        assert_eq!(relaxed.wow64_option(), Wow64Option::Force32);

        let only_set = KeyAccess::SET_VALUE.read_only();
        assert_eq!(only_set, KeyAccess::KEY_READ);
    }
}
