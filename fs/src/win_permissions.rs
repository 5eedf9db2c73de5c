#![cfg(target_family = "windows")]
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use windows_sys::Win32::Foundation::{GetLastError, GENERIC_READ, GENERIC_WRITE};
use windows_sys::Win32::Security::Authorization::{
    SetEntriesInAclW, SetNamedSecurityInfoW, EXPLICIT_ACCESS_W, SE_FILE_OBJECT, SET_ACCESS,
    TRUSTEE_IS_SID, TRUSTEE_W,
};
use windows_sys::Win32::Security::{
    CreateWellKnownSid, WinBuiltinAdministratorsSid, ACL, DACL_SECURITY_INFORMATION,
    NO_INHERITANCE, PROTECTED_DACL_SECURITY_INFORMATION, SECURITY_MAX_SID_SIZE,
};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PermissionError(String);

fn get_administrator_sid() -> Result<Vec<u8>, PermissionError> {
    let mut sid_size = SECURITY_MAX_SID_SIZE as u32;
    let mut sid: Vec<u8> = vec![0; sid_size as usize];

    unsafe {
        if CreateWellKnownSid(
            WinBuiltinAdministratorsSid,
            ptr::null_mut(),
            sid.as_mut_ptr() as *mut _,
            &mut sid_size,
        ) == 0
        {
            return Err(PermissionError(format!(
                "failed to create administrator SID, error {}",
                GetLastError()
            )));
        }
    }

    Ok(sid)
}

/// Removes any other ACL from `path`, granting read/write to Administrators only.
pub fn set_file_permissions_for_administrator(path: &Path) -> Result<(), PermissionError> {
    let path_wstr: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let admin_sid = get_administrator_sid()?;

    let trustee = TRUSTEE_W {
        TrusteeForm: TRUSTEE_IS_SID,
        ptstrName: admin_sid.as_ptr() as *mut _,
        ..Default::default()
    };

    let access_entry = EXPLICIT_ACCESS_W {
        grfAccessPermissions: GENERIC_READ | GENERIC_WRITE,
        grfAccessMode: SET_ACCESS,
        grfInheritance: NO_INHERITANCE,
        Trustee: trustee,
    };

    let mut acl: *mut ACL = ptr::null_mut();
    unsafe {
        if SetEntriesInAclW(1, &access_entry, ptr::null_mut(), &mut acl) != 0 {
            return Err(PermissionError("failed to set entries in ACL".to_string()));
        }

        if SetNamedSecurityInfoW(
            path_wstr.as_ptr(),
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION | PROTECTED_DACL_SECURITY_INFORMATION,
            ptr::null_mut(),
            ptr::null_mut(),
            acl,
            ptr::null_mut(),
        ) != 0
        {
            return Err(PermissionError("failed to set security descriptor".to_string()));
        }
    }

    Ok(())
}
