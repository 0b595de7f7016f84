//! The real registry through `advapi32`, plus `NtQueryKey` from `ntdll` for
//! naming handles the overlay did not open.

use super::{LiveHandle, LiveRegistry};
use crate::identity::{PredefinedRoot, RegistryPath, RegistryView};
use crate::key_impl::KeyInfo;
use crate::value::{RegValue, ValueType, bytes_to_units};
use log::{debug, warn};
use shared::errors::RegistryError;
use std::ffi::c_void;
use std::ptr::{null, null_mut};
use windows_sys::Win32::Foundation::{
    ERROR_INSUFFICIENT_BUFFER, ERROR_MORE_DATA, ERROR_SUCCESS, FILETIME, HANDLE,
};
use windows_sys::Win32::Security::{
    DACL_SECURITY_INFORMATION, GROUP_SECURITY_INFORMATION, OWNER_SECURITY_INFORMATION,
};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_CONFIG, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE,
    HKEY_PERFORMANCE_DATA, HKEY_USERS, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY, RegCloseKey,
    RegEnumKeyExW, RegEnumValueW, RegGetKeySecurity, RegOpenKeyExW, RegQueryInfoKeyW,
    RegQueryValueExW,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, IsWow64Process};

const KEY_NAME_INFORMATION: u32 = 3;
const STATUS_BUFFER_OVERFLOW: i32 = 0x8000_0005_u32 as i32;
const STATUS_BUFFER_TOO_SMALL: i32 = 0xC000_0023_u32 as i32;
/// Longest key name the registry allows, plus the terminator.
const MAX_KEY_NAME: usize = 256;

type NtQueryKeyFn = unsafe extern "system" fn(
    key: HANDLE,
    class: u32,
    information: *mut c_void,
    length: u32,
    result_length: *mut u32,
) -> i32;

pub struct WindowsRegistry {
    nt_query_key: Option<NtQueryKeyFn>,
    os_is_64bit: bool,
    user_sid: Option<String>,
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn check(status: u32) -> Result<(), RegistryError> {
    if status == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(RegistryError::from_win32(status))
    }
}

fn hkey(handle: LiveHandle) -> HKEY {
    handle as usize as HKEY
}

fn root_hkey(root: PredefinedRoot) -> HKEY {
    match root {
        PredefinedRoot::ClassesRoot => HKEY_CLASSES_ROOT,
        PredefinedRoot::CurrentUser => HKEY_CURRENT_USER,
        PredefinedRoot::LocalMachine => HKEY_LOCAL_MACHINE,
        PredefinedRoot::Users => HKEY_USERS,
        PredefinedRoot::PerformanceData => HKEY_PERFORMANCE_DATA,
        PredefinedRoot::CurrentConfig => HKEY_CURRENT_CONFIG,
    }
}

fn filetime_ticks(ft: &FILETIME) -> u64 {
    (u64::from(ft.dwHighDateTime) << 32) | u64::from(ft.dwLowDateTime)
}

fn resolve_nt_query_key() -> Option<NtQueryKeyFn> {
    // SAFETY: ntdll is mapped into every process; the symbol has the
    // documented NtQueryKey signature.
    unsafe {
        let module = GetModuleHandleA(c"ntdll.dll".as_ptr().cast());
        if module.is_null() {
            return None;
        }
        GetProcAddress(module, c"NtQueryKey".as_ptr().cast())
            .map(|f| std::mem::transmute::<_, NtQueryKeyFn>(f))
    }
}

fn detect_os_64bit() -> bool {
    if cfg!(target_pointer_width = "64") {
        return true;
    }
    let mut wow = 0;
    // SAFETY: the pseudo-handle of the current process is always valid.
    let ok = unsafe { IsWow64Process(GetCurrentProcess(), &mut wow) };
    ok != 0 && wow != 0
}

impl Default for WindowsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            nt_query_key: resolve_nt_query_key(),
            os_is_64bit: detect_os_64bit(),
            user_sid: None,
        };
        if registry.nt_query_key.is_none() {
            warn!("NtQueryKey unavailable; foreign key handles cannot be resolved");
        }
        registry.user_sid = registry.lookup_user_sid();
        debug!(
            "Live registry ready (64-bit OS: {}, user SID: {:?})",
            registry.os_is_64bit, registry.user_sid
        );
        registry
    }

    /// `\REGISTRY\USER\<sid>` is what `HKEY_CURRENT_USER` opens to.
    fn lookup_user_sid(&self) -> Option<String> {
        let mut handle: HKEY = null_mut();
        // SAFETY: out-pointer is valid; a null subkey reopens the root.
        let status =
            unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, null(), 0, KEY_READ, &mut handle) };
        if status != ERROR_SUCCESS {
            return None;
        }
        let name = self.native_key_path(handle as usize as u64);
        // SAFETY: handle was opened above.
        unsafe { RegCloseKey(handle) };
        name?
            .split('\\')
            .filter(|s| !s.is_empty())
            .nth(2)
            .map(str::to_string)
    }

    fn view_flags(&self, view: RegistryView) -> u32 {
        match (self.os_is_64bit, view) {
            (false, _) => 0,
            (true, RegistryView::Native) => KEY_WOW64_64KEY,
            (true, RegistryView::Redirected32) => KEY_WOW64_32KEY,
        }
    }
}

impl LiveRegistry for WindowsRegistry {
    fn open_key(&self, path: &RegistryPath) -> Result<LiveHandle, RegistryError> {
        let subkey = wide(&path.path);
        let mut handle: HKEY = null_mut();
        // SAFETY: subkey is NUL-terminated and outlives the call.
        check(unsafe {
            RegOpenKeyExW(
                root_hkey(path.root),
                subkey.as_ptr(),
                0,
                KEY_READ | self.view_flags(path.view),
                &mut handle,
            )
        })?;
        Ok(handle as usize as u64)
    }

    fn close_key(&self, handle: LiveHandle) {
        // SAFETY: handles come from open_key and are closed once.
        let status = unsafe { RegCloseKey(hkey(handle)) };
        if status != ERROR_SUCCESS {
            warn!("RegCloseKey({handle:#x}) failed with {status}");
        }
    }

    fn query_value(&self, handle: LiveHandle, name: &str) -> Result<RegValue, RegistryError> {
        let name = wide(name);
        let mut kind = 0u32;
        let mut size = 0u32;
        // SAFETY: size probe with a null data pointer.
        check(unsafe {
            RegQueryValueExW(hkey(handle), name.as_ptr(), null(), &mut kind, null_mut(), &mut size)
        })?;
        loop {
            let mut data = vec![0u8; size as usize];
            // SAFETY: data holds `size` bytes.
            let status = unsafe {
                RegQueryValueExW(
                    hkey(handle),
                    name.as_ptr(),
                    null(),
                    &mut kind,
                    data.as_mut_ptr(),
                    &mut size,
                )
            };
            if status == ERROR_MORE_DATA {
                continue;
            }
            check(status)?;
            data.truncate(size as usize);
            return Ok(RegValue::new(ValueType(kind), data));
        }
    }

    fn enum_key(&self, handle: LiveHandle, index: u32) -> Result<String, RegistryError> {
        let mut name = [0u16; MAX_KEY_NAME];
        let mut len = name.len() as u32;
        // SAFETY: name holds `len` units.
        check(unsafe {
            RegEnumKeyExW(
                hkey(handle),
                index,
                name.as_mut_ptr(),
                &mut len,
                null(),
                null_mut(),
                null_mut(),
                null_mut(),
            )
        })?;
        Ok(String::from_utf16_lossy(&name[..len as usize]))
    }

    fn enum_value(
        &self,
        handle: LiveHandle,
        index: u32,
    ) -> Result<(String, RegValue), RegistryError> {
        let info = self.query_info(handle)?;
        let mut name_cap = info.max_value_name_len as usize + 1;
        let mut data_cap = info.max_value_len as usize;
        loop {
            let mut name = vec![0u16; name_cap];
            let mut data = vec![0u8; data_cap];
            let mut name_len = name_cap as u32;
            let mut data_len = data_cap as u32;
            let mut kind = 0u32;
            // SAFETY: both buffers hold the lengths passed in.
            let status = unsafe {
                RegEnumValueW(
                    hkey(handle),
                    index,
                    name.as_mut_ptr(),
                    &mut name_len,
                    null(),
                    &mut kind,
                    data.as_mut_ptr(),
                    &mut data_len,
                )
            };
            if status == ERROR_MORE_DATA {
                // Value grew since the info query.
                name_cap *= 2;
                data_cap = data_cap.max(data_len as usize).max(1) * 2;
                continue;
            }
            check(status)?;
            data.truncate(data_len as usize);
            let name = String::from_utf16_lossy(&name[..name_len as usize]);
            return Ok((name, RegValue::new(ValueType(kind), data)));
        }
    }

    fn query_info(&self, handle: LiveHandle) -> Result<KeyInfo, RegistryError> {
        let mut class = vec![0u16; MAX_KEY_NAME];
        loop {
            let mut class_len = class.len() as u32;
            let mut info = KeyInfo::default();
            let mut written = FILETIME {
                dwLowDateTime: 0,
                dwHighDateTime: 0,
            };
            // SAFETY: every out-pointer is valid for the call.
            let status = unsafe {
                RegQueryInfoKeyW(
                    hkey(handle),
                    class.as_mut_ptr(),
                    &mut class_len,
                    null(),
                    &mut info.subkeys,
                    &mut info.max_subkey_len,
                    &mut info.max_class_len,
                    &mut info.values,
                    &mut info.max_value_name_len,
                    &mut info.max_value_len,
                    &mut info.security_descriptor_len,
                    &mut written,
                )
            };
            if status == ERROR_MORE_DATA {
                class.resize(class.len() * 2, 0);
                continue;
            }
            check(status)?;
            info.last_write_time = filetime_ticks(&written);
            info.class = (class_len > 0)
                .then(|| String::from_utf16_lossy(&class[..class_len as usize]));
            return Ok(info);
        }
    }

    fn key_security(&self, handle: LiveHandle) -> Result<Vec<u8>, RegistryError> {
        let wanted =
            OWNER_SECURITY_INFORMATION | GROUP_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION;
        let mut size = 0u32;
        // SAFETY: size probe with a null descriptor.
        let status = unsafe { RegGetKeySecurity(hkey(handle), wanted, null_mut(), &mut size) };
        if status != ERROR_INSUFFICIENT_BUFFER {
            check(status)?;
            return Ok(Vec::new());
        }
        let mut descriptor = vec![0u8; size as usize];
        // SAFETY: descriptor holds `size` bytes.
        check(unsafe {
            RegGetKeySecurity(hkey(handle), wanted, descriptor.as_mut_ptr().cast(), &mut size)
        })?;
        descriptor.truncate(size as usize);
        Ok(descriptor)
    }

    fn native_key_path(&self, raw: u64) -> Option<String> {
        let query = self.nt_query_key?;
        let mut buffer = vec![0u8; 512];
        loop {
            let mut needed = 0u32;
            // SAFETY: buffer holds the length passed in.
            let status = unsafe {
                query(
                    raw as usize as HANDLE,
                    KEY_NAME_INFORMATION,
                    buffer.as_mut_ptr().cast(),
                    buffer.len() as u32,
                    &mut needed,
                )
            };
            if status == STATUS_BUFFER_OVERFLOW || status == STATUS_BUFFER_TOO_SMALL {
                buffer.resize((needed as usize).max(buffer.len() * 2), 0);
                continue;
            }
            if status < 0 {
                return None;
            }
            // KEY_NAME_INFORMATION { ULONG NameLength; WCHAR Name[]; }
            let (len, name) = buffer.split_at_checked(4)?;
            let len = u32::from_le_bytes(len.try_into().ok()?) as usize;
            let units = bytes_to_units(name.get(..len)?);
            return Some(String::from_utf16_lossy(&units));
        }
    }

    fn current_user_sid(&self) -> Option<String> {
        self.user_sid.clone()
    }

    fn is_os_64bit(&self) -> bool {
        self.os_is_64bit
    }
}

