//! Keeps archive entries inside the directory they're extracted to.
//!
//! ZIP makes no promises about entry names:
//! `../../etc/passwd` and `/etc/passwd` are both perfectly storable.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;

/// Returns the entry's name as a normalized relative path,
/// or `None` if it would resolve outside of wherever it's extracted.
///
/// Normalization is purely lexical (nothing on disk is consulted):
/// `.` components are dropped and `a/../b` becomes `b`.
/// Names that are absolute, carry a (Windows) prefix,
/// or climb above their root with `..` are refused.
///
/// The result may be empty if the name refers to the root itself (e.g., `./`).
pub fn enclosed_path(name: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut enclosed = Utf8PathBuf::new();

    for component in name.components() {
        match component {
            Utf8Component::Prefix(prefix) => {
                debug!("Prefix {} found in path {name}", prefix.as_str());
                return None;
            }
            Utf8Component::RootDir => {
                debug!("Root directory found in path {name}");
                return None;
            }
            Utf8Component::CurDir => {
                warn!("Current dir (.) found in path {name}");
            }
            Utf8Component::ParentDir => {
                if !enclosed.pop() {
                    debug!("{name} climbs out of its root");
                    return None;
                }
            }
            Utf8Component::Normal(part) => enclosed.push(part),
        }
    }

    Some(enclosed)
}
