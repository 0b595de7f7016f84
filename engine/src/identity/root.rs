use shared::constants::CURRENT_USER_ALIAS;
use std::fmt;

/// Predefined registry roots an identity can be anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PredefinedRoot {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
    PerformanceData,
    CurrentConfig,
}

impl PredefinedRoot {
    pub const ALL: [PredefinedRoot; 6] = [
        PredefinedRoot::ClassesRoot,
        PredefinedRoot::CurrentUser,
        PredefinedRoot::LocalMachine,
        PredefinedRoot::Users,
        PredefinedRoot::PerformanceData,
        PredefinedRoot::CurrentConfig,
    ];

    /// The pseudo-handle value Win32 uses for this root (`HKEY_*`).
    pub const fn handle_value(self) -> u64 {
        match self {
            PredefinedRoot::ClassesRoot => 0x8000_0000,
            PredefinedRoot::CurrentUser => 0x8000_0001,
            PredefinedRoot::LocalMachine => 0x8000_0002,
            PredefinedRoot::Users => 0x8000_0003,
            PredefinedRoot::PerformanceData => 0x8000_0004,
            PredefinedRoot::CurrentConfig => 0x8000_0005,
        }
    }

    /// Recognises a predefined pseudo-handle. Sign-extended 32-bit values
    /// (as produced by 32-bit callers widening `HKEY`) are accepted too.
    pub fn from_handle(handle: u64) -> Option<Self> {
        let low = if handle >> 32 == 0xFFFF_FFFF {
            handle & 0xFFFF_FFFF
        } else {
            handle
        };
        Self::ALL.into_iter().find(|root| root.handle_value() == low)
    }

    /// Long Win32 name, as used in diagnostic paths.
    pub const fn win32_name(self) -> &'static str {
        match self {
            PredefinedRoot::ClassesRoot => "HKEY_CLASSES_ROOT",
            PredefinedRoot::CurrentUser => "HKEY_CURRENT_USER",
            PredefinedRoot::LocalMachine => "HKEY_LOCAL_MACHINE",
            PredefinedRoot::Users => "HKEY_USERS",
            PredefinedRoot::PerformanceData => "HKEY_PERFORMANCE_DATA",
            PredefinedRoot::CurrentConfig => "HKEY_CURRENT_CONFIG",
        }
    }

    pub const fn short_name(self) -> &'static str {
        match self {
            PredefinedRoot::ClassesRoot => "HKCR",
            PredefinedRoot::CurrentUser => "HKCU",
            PredefinedRoot::LocalMachine => "HKLM",
            PredefinedRoot::Users => "HKU",
            PredefinedRoot::PerformanceData => "HKPD",
            PredefinedRoot::CurrentConfig => "HKCC",
        }
    }

    /// Accepts either the long or the short name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|root| {
            root.win32_name().eq_ignore_ascii_case(name)
                || root.short_name().eq_ignore_ascii_case(name)
        })
    }

    /// Segments under `\REGISTRY` where this root lives inside an offline hive.
    pub fn native_prefix(self) -> &'static [&'static str] {
        match self {
            PredefinedRoot::ClassesRoot => &["MACHINE", "SOFTWARE", "Classes"],
            PredefinedRoot::CurrentUser => &["USER", CURRENT_USER_ALIAS],
            PredefinedRoot::LocalMachine => &["MACHINE"],
            PredefinedRoot::Users => &["USER"],
            PredefinedRoot::PerformanceData => &["PERFORMANCE"],
            PredefinedRoot::CurrentConfig => &[
                "MACHINE",
                "SYSTEM",
                "CurrentControlSet",
                "Hardware Profiles",
                "Current",
            ],
        }
    }
}

impl fmt::Display for PredefinedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.win32_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_round_trip() {
        for root in PredefinedRoot::ALL {
            assert_eq!(PredefinedRoot::from_handle(root.handle_value()), Some(root));
        }
        assert_eq!(
            PredefinedRoot::from_handle(0xFFFF_FFFF_8000_0002),
            Some(PredefinedRoot::LocalMachine)
        );
        assert_eq!(PredefinedRoot::from_handle(0x0100_0004), None);
    }

    #[test]
    fn parses_long_and_short_names() {
        assert_eq!(PredefinedRoot::parse("hklm"), Some(PredefinedRoot::LocalMachine));
        assert_eq!(
            PredefinedRoot::parse("HKEY_CLASSES_ROOT"),
            Some(PredefinedRoot::ClassesRoot)
        );
        assert_eq!(PredefinedRoot::parse("HKEY_NOPE"), None);
    }
}
