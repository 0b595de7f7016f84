//! WOW64 view selection and the redirection table.
//!
//! Offline hives know nothing about WOW64, so the engine replays the OS
//! mapping itself: a 32-bit view of a redirected key gets the `Wow6432Node`
//! marker inserted right after the redirected prefix.

use super::root::PredefinedRoot;
use shared::constants::WOW64_MARKER;

/// Explicit view requested by the caller through `KEY_WOW64_32KEY` /
/// `KEY_WOW64_64KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wow64Option {
    #[default]
    Unspecified,
    Force32,
    Force64,
}

/// The registry view an identity was resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryView {
    Native,
    Redirected32,
}

/// Bitness facts needed to pick a view when the caller did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wow64Context {
    pub os_is_64bit: bool,
    pub process_is_32bit: bool,
}

impl Wow64Context {
    /// Context for the running process on an OS of the given bitness.
    pub fn current(os_is_64bit: bool) -> Self {
        Self {
            os_is_64bit,
            process_is_32bit: cfg!(target_pointer_width = "32"),
        }
    }

    /// 32-bit OS: never redirected. Otherwise the explicit option wins, then
    /// the process bitness.
    pub fn resolve_view(&self, option: Wow64Option) -> RegistryView {
        if !self.os_is_64bit {
            return RegistryView::Native;
        }
        match option {
            Wow64Option::Force32 => RegistryView::Redirected32,
            Wow64Option::Force64 => RegistryView::Native,
            Wow64Option::Unspecified if self.process_is_32bit => RegistryView::Redirected32,
            Wow64Option::Unspecified => RegistryView::Native,
        }
    }
}

struct RedirectedPrefix {
    root: PredefinedRoot,
    prefix: &'static [&'static str],
}

/// Ordered by specificity: the first match is the deepest.
const REDIRECTED: [RedirectedPrefix; 5] = [
    RedirectedPrefix {
        root: PredefinedRoot::LocalMachine,
        prefix: &["Software", "Classes"],
    },
    RedirectedPrefix {
        root: PredefinedRoot::CurrentUser,
        prefix: &["Software", "Classes"],
    },
    RedirectedPrefix {
        root: PredefinedRoot::LocalMachine,
        prefix: &["Software"],
    },
    RedirectedPrefix {
        root: PredefinedRoot::CurrentUser,
        prefix: &["Software"],
    },
    RedirectedPrefix {
        root: PredefinedRoot::ClassesRoot,
        prefix: &[],
    },
];

pub fn is_marker(segment: &str) -> bool {
    segment.eq_ignore_ascii_case(WOW64_MARKER)
}

fn starts_with(segments: &[String], prefix: &[&str]) -> bool {
    segments.len() >= prefix.len()
        && segments
            .iter()
            .zip(prefix)
            .all(|(s, p)| s.eq_ignore_ascii_case(p))
}

/// Length of the deepest redirected prefix `segments` falls under.
fn redirected_prefix_len(root: PredefinedRoot, segments: &[String]) -> Option<usize> {
    REDIRECTED
        .iter()
        .find(|r| r.root == root && starts_with(segments, r.prefix))
        .map(|r| r.prefix.len())
}

/// Redirects the part of a path below its redirected prefix.
///
/// Returns `None` when there is nothing to redirect: the container itself
/// (empty tail) or a tail that is exactly the marker.
pub fn redirect_tail(tail: &[String]) -> Option<Vec<String>> {
    match tail {
        [] => None,
        [only] if is_marker(only) => None,
        _ => {
            let mut out = Vec::with_capacity(tail.len() + 1);
            out.push(WOW64_MARKER.to_string());
            out.extend(tail.iter().cloned());
            Some(out)
        }
    }
}

/// Inserts the marker for a 32-bit view. Paths that already carry a marker
/// anywhere are left alone so an identity never holds two.
pub fn insert_marker(root: PredefinedRoot, segments: &mut Vec<String>) {
    if segments.iter().any(|s| is_marker(s)) {
        return;
    }
    let Some(at) = redirected_prefix_len(root, segments) else {
        return;
    };
    if let Some(redirected) = redirect_tail(&segments[at..]) {
        segments.truncate(at);
        segments.extend(redirected);
    }
}

/// Position of a marker sitting exactly at a redirection point.
pub fn marker_position(root: PredefinedRoot, segments: &[String]) -> Option<usize> {
    REDIRECTED
        .iter()
        .filter(|r| r.root == root && starts_with(segments, r.prefix))
        .map(|r| r.prefix.len())
        .find(|&at| segments.get(at).is_some_and(|s| is_marker(s)))
}

/// Removes the redirection marker, reporting whether the path was a 32-bit view.
pub fn strip_marker(root: PredefinedRoot, segments: &[String]) -> (Vec<String>, RegistryView) {
    match marker_position(root, segments) {
        Some(at) => {
            let mut out = segments.to_vec();
            out.remove(at);
            (out, RegistryView::Redirected32)
        }
        None => (segments.to_vec(), RegistryView::Native),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<String> {
        path.split('\\')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn view_follows_option_then_bitness() {
        let wow = Wow64Context {
            os_is_64bit: true,
            process_is_32bit: true,
        };
        assert_eq!(wow.resolve_view(Wow64Option::Unspecified), RegistryView::Redirected32);
        assert_eq!(wow.resolve_view(Wow64Option::Force64), RegistryView::Native);

        let native = Wow64Context {
            os_is_64bit: true,
            process_is_32bit: false,
        };
        assert_eq!(native.resolve_view(Wow64Option::Unspecified), RegistryView::Native);
        assert_eq!(native.resolve_view(Wow64Option::Force32), RegistryView::Redirected32);

        let x86 = Wow64Context {
            os_is_64bit: false,
            process_is_32bit: true,
        };
        assert_eq!(x86.resolve_view(Wow64Option::Force32), RegistryView::Native);
    }

    #[test]
    fn deepest_prefix_wins() {
        let mut path = segs(r"Software\Classes\CLSID");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs(r"Software\Classes\Wow6432Node\CLSID"));

        let mut path = segs(r"SOFTWARE\Vendor\App");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs(r"SOFTWARE\Wow6432Node\Vendor\App"));

        let mut path = segs(r"CLSID\{0}");
        insert_marker(PredefinedRoot::ClassesRoot, &mut path);
        assert_eq!(path, segs(r"Wow6432Node\CLSID\{0}"));
    }

    #[test]
    fn containers_and_unredirected_roots_are_untouched() {
        let mut path = segs("Software");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs("Software"));

        let mut path = segs(r"SYSTEM\CurrentControlSet");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs(r"SYSTEM\CurrentControlSet"));

        let mut path = segs(r"S-1-5-18\Software\Foo");
        insert_marker(PredefinedRoot::Users, &mut path);
        assert_eq!(path, segs(r"S-1-5-18\Software\Foo"));
    }

    #[test]
    fn marker_alone_is_not_redirected() {
        assert_eq!(redirect_tail(&segs("Wow6432Node")), None);
        assert_eq!(redirect_tail(&[]), None);

        let mut path = segs(r"Software\Wow6432Node");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs(r"Software\Wow6432Node"));
    }

    #[test]
    fn never_two_markers() {
        let mut path = segs(r"Software\Wow6432Node\Foo");
        insert_marker(PredefinedRoot::LocalMachine, &mut path);
        assert_eq!(path, segs(r"Software\Wow6432Node\Foo"));
    }

    #[test]
    fn strip_only_at_redirection_points() {
        let (path, view) =
            strip_marker(PredefinedRoot::LocalMachine, &segs(r"Software\Wow6432Node\Foo"));
        assert_eq!(path, segs(r"Software\Foo"));
        assert_eq!(view, RegistryView::Redirected32);

        let (path, view) =
            strip_marker(PredefinedRoot::LocalMachine, &segs(r"Software\Foo\Wow6432Node"));
        assert_eq!(path, segs(r"Software\Foo\Wow6432Node"));
        assert_eq!(view, RegistryView::Native);
    }
}
