// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The filesystem granter: the canonical pledge policy module.
//!
//! Grants `fs` (global), `fs:read` and `fs:write`. Checks match the
//! requested path against each stored value with glob semantics,
//! canonicalizing through symlink resolution where the path resolves.
//! A stored permission with no values grants everything under it.

use crate::glob::glob_match_path;
use crate::store::{PledgeRequest, PledgeStatus, PledgeStore};

/// Register the fs granter on a store.
pub fn install(store: &mut PledgeStore) {
    store.register_granter("fs", fs_granter);
}

fn fs_granter(req: &mut PledgeRequest) {
    match req.status() {
        PledgeStatus::Grant | PledgeStatus::Update => {
            let sub = req.sub().map(String::from);
            let value = req.value().map(String::from);
            match sub.as_deref() {
                None => req.confirm(None, value.as_deref()),
                Some("read") | Some("write") => req.confirm(sub.as_deref(), value.as_deref()),
                Some(other) => {
                    req.error(format!("unknown fs subpermission: '{other}'"));
                }
            }
        }
        PledgeStatus::Check => {
            let sub = req.sub().map(String::from);
            let Some(path) = req.value().map(String::from) else {
                // No path to check: allowed because the permission
                // exists at all.
                req.confirm(sub.as_deref(), None);
                return;
            };
            if req.has_base() && req.count() == 0 {
                req.confirm(sub.as_deref(), None);
                return;
            }
            while req.next() {
                let matched = req
                    .current()
                    .is_some_and(|stored| glob_match_path(stored, &path, true));
                if matched {
                    req.confirm(sub.as_deref(), None);
                    return;
                }
            }
            // No stored value matched: unprocessed, so denied.
        }
    }
}
