//! Image path normalization.
//!
//! Kernel image paths come back in device form
//! (`\Device\HarddiskVolume3\Windows\explorer.exe`). Before hashing they are
//! rewritten to drive-letter form using the live drive map and split into
//! the full path and its directory.

use crate::collector::platform::DeviceMap;

/// Longest device target considered when matching prefixes (MAX_PATH).
const MAX_DEVICE_TARGET: usize = 260;

/// Longest image path, in UTF-16 units, that is split and hashed.
pub const MAX_IMAGE_PATH_UNITS: usize = 511;

/// Narrow-string buffer limit (MAX_PATH minus the terminator).
pub const MAX_NARROW_PATH: usize = 259;

/// A normalized image path split for hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPath {
    /// The whole path.
    pub full: String,
    /// Everything before the last separator. Empty when there is none.
    pub directory: String,
}

/// Rewrites the device-form prefix of `path` to its drive letter.
///
/// Drives are tried in enumeration order and the first device target that
/// is a case-insensitive prefix of `path` wins. Returns `None` when no drive
/// maps onto the path, in which case the caller keeps the original.
pub fn rewrite_device_prefix<D: DeviceMap + ?Sized>(path: &str, devices: &D) -> Option<String> {
    for drive in devices.logical_drives() {
        let Some(target) = devices.query_dos_device(drive) else {
            continue;
        };
        if target.is_empty() || target.len() >= MAX_DEVICE_TARGET {
            continue;
        }
        let Some(prefix) = path.get(..target.len()) else {
            continue;
        };
        if prefix.eq_ignore_ascii_case(&target) {
            return Some(format!("{}:{}", drive, &path[target.len()..]));
        }
    }
    None
}

/// Normalizes `path` and splits it into full path and directory.
///
/// Returns `None` for empty paths and for paths longer than
/// [`MAX_IMAGE_PATH_UNITS`]. Both components are truncated to
/// [`MAX_NARROW_PATH`] bytes on a character boundary.
pub fn normalize_image_path<D: DeviceMap + ?Sized>(path: &str, devices: &D) -> Option<SplitPath> {
    let units = path.encode_utf16().count();
    if units == 0 || units > MAX_IMAGE_PATH_UNITS {
        return None;
    }

    let full = rewrite_device_prefix(path, devices).unwrap_or_else(|| path.to_string());

    // A separator in the first position does not start a directory.
    let directory = match full.rfind(['\\', '/']) {
        Some(pos) if pos > 0 => &full[..pos],
        _ => "",
    };

    Some(SplitPath {
        directory: truncate_narrow(directory).to_string(),
        full: truncate_narrow(&full).to_string(),
    })
}

fn truncate_narrow(s: &str) -> &str {
    if s.len() <= MAX_NARROW_PATH {
        return s;
    }
    let mut end = MAX_NARROW_PATH;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
