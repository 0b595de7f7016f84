use super::root::PredefinedRoot;
use super::wow64::{self, RegistryView, Wow64Context, Wow64Option};
use shared::constants::CURRENT_USER_ALIAS;
use shared::errors::RegistryError;
use std::fmt;
use std::hash::{Hash, Hasher};

const NATIVE_ROOT: &str = "REGISTRY";

/// Canonical "which key" value: a predefined root plus a relative path.
///
/// Paths compare case-insensitively, and at most one `Wow6432Node` marker is
/// ever present. Identities are built per operation and never persisted.
#[derive(Clone)]
pub struct KeyIdentity {
    root: PredefinedRoot,
    segments: Vec<String>,
    folded: String,
}

/// Projection handed to the live registry: no marker, explicit view instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPath {
    pub root: PredefinedRoot,
    pub path: String,
    pub view: RegistryView,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|s| !s.is_empty())
}

impl KeyIdentity {
    pub fn new(root: PredefinedRoot, segments: Vec<String>) -> Self {
        let folded = segments
            .iter()
            .map(|s| s.to_uppercase())
            .collect::<Vec<_>>()
            .join("\\");
        Self {
            root,
            segments,
            folded,
        }
    }

    pub fn root(root: PredefinedRoot) -> Self {
        Self::new(root, Vec::new())
    }

    /// Appends `subkey` to `parent` and applies WOW64 redirection for the view
    /// the explicit option and the process bitness select.
    pub fn build(
        parent: &KeyIdentity,
        option: Wow64Option,
        subkey: &str,
        wow: &Wow64Context,
    ) -> Self {
        let mut segments = parent.segments.clone();
        segments.extend(split_path(subkey).map(str::to_string));
        if wow.resolve_view(option) == RegistryView::Redirected32 {
            wow64::insert_marker(parent.root, &mut segments);
        }
        Self::new(parent.root, segments)
    }

    /// Resolves an NT object-namespace name (as reported for a foreign native
    /// handle) into a predefined root plus prefix path.
    pub fn from_native_path(
        path: &str,
        current_user_sid: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let mut parts = split_path(path);
        if !parts
            .next()
            .is_some_and(|p| p.eq_ignore_ascii_case(NATIVE_ROOT))
        {
            return Err(RegistryError::InvalidHandle);
        }
        let hive = parts.next().ok_or(RegistryError::InvalidHandle)?;
        let rest: Vec<String> = parts.map(str::to_string).collect();

        if hive.eq_ignore_ascii_case("MACHINE") {
            return Ok(Self::new(PredefinedRoot::LocalMachine, rest));
        }
        if !hive.eq_ignore_ascii_case("USER") {
            return Err(RegistryError::InvalidHandle);
        }

        let Some((account, below)) = rest.split_first() else {
            return Ok(Self::root(PredefinedRoot::Users));
        };
        let below = below.to_vec();
        if account.eq_ignore_ascii_case(CURRENT_USER_ALIAS) {
            return Ok(Self::new(PredefinedRoot::CurrentUser, below));
        }
        if let Some(sid) = current_user_sid {
            if account.eq_ignore_ascii_case(sid) {
                return Ok(Self::new(PredefinedRoot::CurrentUser, below));
            }
            let classes = format!("{sid}_Classes");
            if account.eq_ignore_ascii_case(&classes) {
                let mut segments = vec!["Software".to_string(), "Classes".to_string()];
                segments.extend(below);
                return Ok(Self::new(PredefinedRoot::CurrentUser, segments));
            }
        }
        Ok(Self::new(PredefinedRoot::Users, rest))
    }

    /// Parses a Win32 path such as `HKLM\Software\Vendor`.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = split_path(path);
        let root = PredefinedRoot::parse(parts.next()?)?;
        Some(Self::new(root, parts.map(str::to_string).collect()))
    }

    pub fn root_key(&self) -> PredefinedRoot {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path with the redirection marker removed.
    pub fn unredirected_segments(&self) -> Vec<String> {
        wow64::strip_marker(self.root, &self.segments).0
    }

    /// `self` is `ancestor` or lies below it.
    pub fn is_within(&self, ancestor: &KeyIdentity) -> bool {
        self.root == ancestor.root
            && self.segments.len() >= ancestor.segments.len()
            && (ancestor.folded.is_empty()
                || self.folded == ancestor.folded
                || self
                    .folded
                    .strip_prefix(&ancestor.folded)
                    .is_some_and(|rest| rest.starts_with('\\')))
    }

    /// Projection for the live registry layer.
    pub fn registry_path(&self) -> RegistryPath {
        let (segments, view) = wow64::strip_marker(self.root, &self.segments);
        RegistryPath {
            root: self.root,
            path: segments.join("\\"),
            view,
        }
    }

    /// Segments of this key inside an offline hive tree.
    pub fn native_segments(&self) -> Vec<String> {
        self.root
            .native_prefix()
            .iter()
            .map(|s| s.to_string())
            .chain(self.segments.iter().cloned())
            .collect()
    }

    /// Projection for the offline hive layer: `\REGISTRY\MACHINE\...`.
    pub fn native_path(&self) -> String {
        let mut out = format!("\\{NATIVE_ROOT}");
        for segment in self.native_segments() {
            out.push('\\');
            out.push_str(&segment);
        }
        out
    }

    /// Projection for diagnostics: `HKEY_LOCAL_MACHINE\Software\...`.
    pub fn system_path(&self) -> String {
        let mut out = self.root.win32_name().to_string();
        for segment in &self.segments {
            out.push('\\');
            out.push_str(segment);
        }
        out
    }
}

impl PartialEq for KeyIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.folded == other.folded
    }
}

impl Eq for KeyIdentity {}

impl Hash for KeyIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.folded.hash(state);
    }
}

impl fmt::Debug for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyIdentity({})", self.system_path())
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.system_path())
    }
}
