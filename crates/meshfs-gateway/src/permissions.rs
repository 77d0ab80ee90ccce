//! Per-principal authorization over shares.

use crate::share::Share;
use http::Method;
use std::collections::HashMap;

/// What a principal may do with one share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// The share is invisible to the principal.
    None,
    /// The principal may browse and read.
    ReadOnly,
    /// The principal may also write.
    ReadWrite,
}

/// Per-request view of a principal's access, derived by the caller from the
/// overlay network's identity and ACL engine.
pub trait Permissions: Send + Sync {
    /// The principal's permission for the named share.
    fn for_share(&self, name: &str) -> Permission;
}

impl Permissions for HashMap<String, Permission> {
    fn for_share(&self, name: &str) -> Permission {
        self.get(name).copied().unwrap_or(Permission::None)
    }
}

/// Grants read-write access to every share. For trusted callers such as the
/// standalone gateway command.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullAccess;

impl Permissions for FullAccess {
    fn for_share(&self, _name: &str) -> Permission {
        Permission::ReadWrite
    }
}

/// Evaluates a principal against each share's reader/writer lists.
///
/// `*` in either list matches every principal. Writers imply readers.
pub fn permissions_for_principal(
    shares: &[Share],
    principal: &str,
) -> HashMap<String, Permission> {
    let matches = |list: &[String]| {
        list.iter()
            .any(|entry| entry == "*" || entry == principal)
    };
    shares
        .iter()
        .map(|share| {
            let permission = if matches(&share.writers) {
                Permission::ReadWrite
            } else if matches(&share.readers) {
                Permission::ReadOnly
            } else {
                Permission::None
            };
            (share.name.clone(), permission)
        })
        .collect()
}

/// Whether the method mutates the target.
///
/// LOCK and UNLOCK count as writes: acquiring a lock on a read-only share
/// would let the principal block writers.
pub fn is_write_method(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "PUT" | "POST" | "COPY" | "LOCK" | "UNLOCK" | "MKCOL" | "MOVE" | "PROPPATCH"
    )
}
