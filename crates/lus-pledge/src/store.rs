// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The per-state capability store and the granter protocol.

/// Why a granter is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PledgeStatus {
    /// New permission request.
    Grant,
    /// Updating an existing permission.
    Update,
    /// Read-only permission check.
    Check,
}

/// Domain policy callback. Plain function pointers so a store deep
/// copy (worker inheritance) copies registrations too.
pub type Granter = fn(&mut PledgeRequest);

/// Pledge errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PledgeError {
    #[error("unknown permission: '{0}'")]
    Unknown(String),
    #[error("permission \"{0}\" was rejected")]
    Rejected(String),
    #[error("permission \"all\" cannot be requested from scripts")]
    AllFromScript,
    #[error("permission \"{perm}\" denied for '{value}'")]
    Denied { perm: String, value: String },
}

/// One stored permission.
#[derive(Debug, Clone)]
struct PledgeEntry {
    name: String,
    /// Granted values; empty on a non-rejected entry means a global
    /// grant for this permission.
    values: Vec<String>,
    rejected: bool,
}

/// A request handed to a granter. The granter inspects the request,
/// iterates stored values with [`PledgeRequest::next`], and either
/// confirms, rejects, or explains the denial. An unprocessed request
/// is a denial.
pub struct PledgeRequest<'a> {
    base: &'a str,
    sub: Option<&'a str>,
    value: Option<&'a str>,
    status: PledgeStatus,
    has_base: bool,
    /// Snapshot of the stored values the granter iterates.
    stored: Vec<String>,
    idx: usize,
    current: Option<String>,
    processed: bool,
    effects: Vec<Effect>,
}

enum Effect {
    Confirm {
        sub: Option<String>,
        value: Option<String>,
    },
    Reject,
    Error(String),
}

impl<'a> PledgeRequest<'a> {
    pub fn base(&self) -> &str {
        self.base
    }

    pub fn sub(&self) -> Option<&str> {
        self.sub
    }

    /// The requested value, or `None` for a global request.
    pub fn value(&self) -> Option<&str> {
        self.value
    }

    pub fn status(&self) -> PledgeStatus {
        self.status
    }

    /// Number of stored values for this permission.
    pub fn count(&self) -> usize {
        self.stored.len()
    }

    /// Whether the bare base permission is already granted.
    pub fn has_base(&self) -> bool {
        self.has_base
    }

    /// The stored value produced by the last `next` call.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Step the iterator over stored values. Returns false when
    /// exhausted.
    pub fn next(&mut self) -> bool {
        if self.idx >= self.stored.len() {
            self.current = None;
            return false;
        }
        self.current = Some(self.stored[self.idx].clone());
        self.idx += 1;
        true
    }

    /// Mark the request processed. In `Grant`/`Update` status this
    /// stores the `(sub, value)` pair; `value = None` means a global
    /// grant for that sub.
    pub fn confirm(&mut self, sub: Option<&str>, value: Option<&str>) {
        self.processed = true;
        self.effects.push(Effect::Confirm {
            sub: sub.map(String::from),
            value: value.map(String::from),
        });
    }

    /// Mark the permission rejected; future grants for it fail.
    pub fn reject(&mut self) {
        self.effects.push(Effect::Reject);
    }

    /// Attach a human-readable explanation for the denial.
    pub fn error(&mut self, message: impl Into<String>) {
        self.effects.push(Effect::Error(message.into()));
    }
}

/// Per-state capability container.
#[derive(Clone, Default)]
pub struct PledgeStore {
    entries: Vec<PledgeEntry>,
    sealed: bool,
    granters: Vec<(String, Granter)>,
    last_error: Option<String>,
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((base, sub)) => (base, Some(sub)),
        None => (name, None),
    }
}

fn joined_name(base: &str, sub: Option<&str>) -> String {
    match sub {
        Some(sub) => format!("{base}:{sub}"),
        None => base.to_string(),
    }
}

impl PledgeStore {
    pub fn new() -> Self {
        PledgeStore::default()
    }

    /// Deep copy for a derived state (worker, detached thread).
    /// Entries, the sealed flag and granter registrations carry over;
    /// the denial message does not. Later changes on either side stay
    /// independent.
    pub fn inherit(&self) -> PledgeStore {
        PledgeStore {
            entries: self.entries.clone(),
            sealed: self.sealed,
            granters: self.granters.clone(),
            last_error: None,
        }
    }

    fn find(&self, name: &str) -> Option<&PledgeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn find_or_create(&mut self, name: &str) -> &mut PledgeEntry {
        if let Some(i) = self.entries.iter().position(|e| e.name == name) {
            return &mut self.entries[i];
        }
        self.entries.push(PledgeEntry {
            name: name.to_string(),
            values: Vec::new(),
            rejected: false,
        });
        self.entries.last_mut().expect("entry just pushed")
    }

    /// Granter lookup: exact name first, then the base before the
    /// first `:`.
    fn find_granter(&self, name: &str) -> Option<Granter> {
        if let Some(&(_, g)) = self.granters.iter().find(|(n, _)| n == name) {
            return Some(g);
        }
        let (base, sub) = split_name(name);
        if sub.is_some() {
            if let Some(&(_, g)) = self.granters.iter().find(|(n, _)| n == base) {
                return Some(g);
            }
        }
        None
    }

    /// Register a granter for a base name, replacing any earlier
    /// registration.
    pub fn register_granter(&mut self, base: &str, granter: Granter) {
        if let Some(slot) = self.granters.iter_mut().find(|(n, _)| n == base) {
            slot.1 = granter;
            return;
        }
        self.granters.push((base.to_string(), granter));
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Registered granter base names. The CLI uses this to expand a
    /// host-side `all` grant; scripts never see it.
    pub fn granter_names(&self) -> Vec<String> {
        self.granters.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Seal the store: no further grants, revokes or rejections.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// The explanation the most recent granter attached to a denial.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn run_granter(
        &mut self,
        granter: Granter,
        base: &str,
        sub: Option<&str>,
        value: Option<&str>,
        status: PledgeStatus,
        stored: Vec<String>,
        has_base: bool,
    ) -> bool {
        let mut req = PledgeRequest {
            base,
            sub,
            value,
            status,
            has_base,
            stored,
            idx: 0,
            current: None,
            processed: false,
            effects: Vec::new(),
        };
        granter(&mut req);
        let processed = req.processed;
        let effects = req.effects;
        let req_sub = sub.map(String::from);
        for effect in effects {
            match effect {
                Effect::Confirm { sub, value } => {
                    // Check-mode confirms only mark the request
                    // processed; nothing is stored.
                    if status == PledgeStatus::Check {
                        continue;
                    }
                    let name = joined_name(base, sub.as_deref());
                    let entry = self.find_or_create(&name);
                    if let Some(value) = value {
                        if !entry.values.contains(&value) {
                            entry.values.push(value);
                        }
                    }
                }
                Effect::Reject => {
                    let name = joined_name(base, req_sub.as_deref());
                    self.find_or_create(&name).rejected = true;
                }
                Effect::Error(message) => {
                    self.last_error = Some(message);
                }
            }
        }
        processed
    }

    /// Grant a permission through its granter. Returns whether the
    /// granter confirmed. Errors if the name has no registered
    /// granter; returns false on a sealed store.
    pub fn pledge(&mut self, name: &str, value: Option<&str>) -> Result<bool, PledgeError> {
        if self.sealed {
            return Ok(false);
        }
        let granter = self
            .find_granter(name)
            .ok_or_else(|| PledgeError::Unknown(name.to_string()))?;
        let (base, sub) = split_name(name);
        let has_base = self.find(base).is_some_and(|e| !e.rejected);
        let stored = self.find(name).map(|e| e.values.clone()).unwrap_or_default();
        self.last_error = None;
        let (base, sub) = (base.to_string(), sub.map(String::from));
        Ok(self.run_granter(
            granter,
            &base,
            sub.as_deref(),
            value,
            PledgeStatus::Grant,
            stored,
            has_base,
        ))
    }

    /// Check a permission through its granter. Never modifies the
    /// store and works on a sealed store.
    pub fn has_pledge(&mut self, name: &str, value: Option<&str>) -> bool {
        if let Some(entry) = self.find(name) {
            if entry.rejected {
                return false;
            }
        }
        let Some(granter) = self.find_granter(name) else {
            return false;
        };
        let (base, sub) = split_name(name);
        let base_entry = self.find(base).filter(|e| !e.rejected);
        let has_base = base_entry.is_some();

        // A non-rejected entry with no stored values is a global
        // grant.
        if let Some(base_entry) = base_entry {
            if base_entry.values.is_empty() && value.is_none() {
                return true;
            }
        }
        let stored = if let Some(entry) = self.find(name) {
            if entry.values.is_empty() {
                return true;
            }
            entry.values.clone()
        } else if let Some(base_entry) = self.find(base).filter(|e| !e.rejected) {
            if base_entry.values.is_empty() {
                return true;
            }
            base_entry.values.clone()
        } else {
            return false;
        };

        let (base, sub) = (base.to_string(), sub.map(String::from));
        self.run_granter(
            granter,
            &base,
            sub.as_deref(),
            value,
            PledgeStatus::Check,
            stored,
            has_base,
        )
    }

    /// Remove all stored values for `name`, keeping the entry. No-op
    /// on a sealed store or an absent entry.
    pub fn revoke(&mut self, name: &str) -> bool {
        if self.sealed {
            return false;
        }
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.values.clear();
                true
            }
            None => false,
        }
    }

    /// Mark `name` rejected so future grants fail. No-op on a sealed
    /// store.
    pub fn reject(&mut self, name: &str) -> bool {
        if self.sealed {
            return false;
        }
        self.find_or_create(name).rejected = true;
        true
    }

    /// Apply one script-side pledge spec: `[~]name[=value]`.
    ///
    /// `all` is refused from scripts; `seal` seals the store and is
    /// itself the one modification a seal records. A leading `~`
    /// rejects the name. Granting a previously rejected name raises.
    pub fn apply_spec(&mut self, spec: &str) -> Result<bool, PledgeError> {
        let (rejecting, rest) = match spec.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (name, value) = match rest.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (rest, None),
        };

        if name == "all" {
            return Err(PledgeError::AllFromScript);
        }
        if name == "seal" {
            self.seal();
            return Ok(true);
        }
        if rejecting {
            return Ok(self.reject(name));
        }
        if self.sealed {
            return Ok(false);
        }
        if self.find(name).is_some_and(|e| e.rejected) {
            return Err(PledgeError::Rejected(name.to_string()));
        }
        self.pledge(name, value)
    }

    /// Raise a denial for `perm` on `path` unless granted. The shared
    /// check used by every filesystem operation.
    pub fn check_fs_perm(&mut self, perm: &str, path: &str) -> Result<(), PledgeError> {
        if self.has_pledge(perm, Some(path)) {
            Ok(())
        } else {
            Err(PledgeError::Denied {
                perm: perm.to_string(),
                value: path.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts everything in grant status; checks values by exact
    /// match.
    fn permissive_granter(req: &mut PledgeRequest) {
        match req.status() {
            PledgeStatus::Grant | PledgeStatus::Update => {
                let sub = req.sub().map(String::from);
                let value = req.value().map(String::from);
                req.confirm(sub.as_deref(), value.as_deref());
            }
            PledgeStatus::Check => {
                let Some(wanted) = req.value().map(String::from) else {
                    let sub = req.sub().map(String::from);
                    req.confirm(sub.as_deref(), None);
                    return;
                };
                while req.next() {
                    if req.current() == Some(wanted.as_str()) {
                        let sub = req.sub().map(String::from);
                        req.confirm(sub.as_deref(), None);
                        return;
                    }
                }
            }
        }
    }

    fn denying_granter(req: &mut PledgeRequest) {
        req.error("policy says no");
    }

    fn store_with_granter() -> PledgeStore {
        let mut store = PledgeStore::new();
        store.register_granter("net", permissive_granter);
        store
    }

    #[test]
    fn unknown_permission_errors() {
        let mut store = PledgeStore::new();
        assert!(matches!(
            store.pledge("bogus", None),
            Err(PledgeError::Unknown(_))
        ));
    }

    #[test]
    fn grant_then_check() {
        let mut store = store_with_granter();
        assert!(store.pledge("net:tcp", Some("example.com")).unwrap());
        assert!(store.has_pledge("net:tcp", Some("example.com")));
        assert!(!store.has_pledge("net:tcp", Some("other.org")));
    }

    #[test]
    fn granter_dispatch_falls_back_to_base() {
        let mut store = store_with_granter();
        // "net:udp" has no exact granter; the "net" granter serves it.
        assert!(store.pledge("net:udp", None).unwrap());
        assert!(store.has_pledge("net:udp", None));
    }

    #[test]
    fn global_grant_matches_any_value() {
        let mut store = store_with_granter();
        assert!(store.pledge("net:tcp", None).unwrap());
        // Entry with no values means global access.
        assert!(store.has_pledge("net:tcp", Some("anything")));
    }

    #[test]
    fn unprocessed_request_is_denied_with_message() {
        let mut store = PledgeStore::new();
        store.register_granter("locked", denying_granter);
        assert!(!store.pledge("locked", None).unwrap());
        assert_eq!(store.last_error(), Some("policy says no"));
    }

    #[test]
    fn seal_blocks_all_modification() {
        let mut store = store_with_granter();
        assert!(store.pledge("net:tcp", Some("a")).unwrap());
        assert!(store.apply_spec("seal").unwrap());
        assert!(store.is_sealed());

        assert!(!store.pledge("net:tcp", Some("b")).unwrap());
        assert!(!store.revoke("net:tcp"));
        assert!(!store.reject("net:tcp"));
        // Checks still work after sealing.
        assert!(store.has_pledge("net:tcp", Some("a")));
        assert!(!store.has_pledge("net:tcp", Some("b")));
    }

    #[test]
    fn repeated_seal_is_idempotent() {
        let mut store = store_with_granter();
        assert!(store.apply_spec("seal").unwrap());
        assert!(store.apply_spec("seal").unwrap());
        assert!(store.is_sealed());
        assert!(!store.apply_spec("net:tcp=x").unwrap());
    }

    #[test]
    fn reject_is_idempotent_and_blocks_grants() {
        let mut store = store_with_granter();
        assert!(store.reject("net:tcp"));
        assert!(store.reject("net:tcp"));
        assert!(matches!(
            store.apply_spec("net:tcp=x"),
            Err(PledgeError::Rejected(_))
        ));
        assert!(!store.has_pledge("net:tcp", Some("x")));
    }

    #[test]
    fn revoke_clears_values_but_keeps_entry() {
        let mut store = store_with_granter();
        store.pledge("net:tcp", Some("a")).unwrap();
        assert!(store.revoke("net:tcp"));
        // Empty values now mean a global grant, per the store's
        // contract; the specific value no longer gates it.
        assert!(store.has_pledge("net:tcp", Some("anything")));
        assert!(!store.revoke("net:missing"));
    }

    #[test]
    fn spec_parsing() {
        let mut store = store_with_granter();
        assert!(store.apply_spec("net:tcp=example.com").unwrap());
        assert!(store.has_pledge("net:tcp", Some("example.com")));

        assert!(store.apply_spec("~net:udp").unwrap());
        assert!(matches!(
            store.apply_spec("net:udp"),
            Err(PledgeError::Rejected(_))
        ));

        assert!(matches!(
            store.apply_spec("all"),
            Err(PledgeError::AllFromScript)
        ));
    }

    #[test]
    fn inheritance_is_independent() {
        let mut parent = store_with_granter();
        parent.pledge("net:tcp", Some("a")).unwrap();

        let mut child = parent.inherit();
        assert!(child.has_pledge("net:tcp", Some("a")));

        // Child-side changes stay in the child.
        child.pledge("net:tcp", Some("b")).unwrap();
        assert!(child.has_pledge("net:tcp", Some("b")));
        assert!(!parent.has_pledge("net:tcp", Some("b")));

        // And parent-side changes stay in the parent.
        parent.reject("net:tcp");
        assert!(child.has_pledge("net:tcp", Some("a")));
    }

    #[test]
    fn sealed_flag_is_inherited() {
        let mut parent = store_with_granter();
        parent.seal();
        let mut child = parent.inherit();
        assert!(child.is_sealed());
        assert!(!child.pledge("net:tcp", None).unwrap());
    }

    #[test]
    fn duplicate_values_are_stored_once() {
        let mut store = store_with_granter();
        store.pledge("net:tcp", Some("a")).unwrap();
        store.pledge("net:tcp", Some("a")).unwrap();
        assert_eq!(store.find("net:tcp").unwrap().values.len(), 1);
    }
}
