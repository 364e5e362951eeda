//! Register store: the name → register mapping owned by one node.
//!
//! Entries are either *stored* (a value with flags, optionally persisted to a
//! [`Backing`]) or *computed* (a getter with an optional setter, evaluated on
//! every access and never persisted).
//!
//! Build a store with [`StoreBuilder`], which layers compiled-in defaults, the
//! durable backing and startup overrides in that order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use plexus_core::{Register, RegisterError, RegisterFlags, RegisterName, Value};
use tracing::{debug, info, warn};

use crate::backing::{Backing, MemoryBacking, PersistedRegister};
use crate::error::NodeError;

// ---------------------------------------------------------------------------
// Coercion policy
// ---------------------------------------------------------------------------

/// How writes of a different kind than the stored one are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionPolicy {
    /// Convert the incoming value into the stored kind when the families match.
    #[default]
    Implicit,
    /// Reject any write whose kind differs from the stored kind.
    Strict,
}

impl CoercionPolicy {
    /// Convert `incoming` into the kind and shape of `stored`.
    ///
    /// Numeric arrays keep their length: an element-count mismatch is an
    /// `IncompatibleKind` even when the kinds agree.
    pub fn assign(self, stored: &Value, incoming: &Value) -> Result<Value, RegisterError> {
        let target = stored.kind();
        if self == CoercionPolicy::Strict && incoming.kind() != target {
            return Err(RegisterError::IncompatibleKind {
                from: incoming.kind(),
                to: target,
                detail: "implicit coercion is disabled".to_string(),
            });
        }
        let coerced = incoming.coerce(target)?;
        if target.is_numeric() && coerced.len() != stored.len() {
            return Err(RegisterError::IncompatibleKind {
                from: incoming.kind(),
                to: target,
                detail: format!("expected {} elements, got {}", stored.len(), coerced.len()),
            });
        }
        Ok(coerced)
    }
}

// ---------------------------------------------------------------------------
// Computed registers
// ---------------------------------------------------------------------------

pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;
pub type Setter = Arc<dyn Fn(Value) + Send + Sync>;

/// A register whose value is derived from live node state.
#[derive(Clone)]
pub struct Computed {
    getter: Getter,
    setter: Option<Setter>,
}

impl Computed {
    pub fn read_only(getter: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            getter: Arc::new(getter),
            setter: None,
        }
    }

    pub fn read_write(
        getter: impl Fn() -> Value + Send + Sync + 'static,
        setter: impl Fn(Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.setter.is_some()
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("mutable", &self.is_mutable())
            .finish_non_exhaustive()
    }
}

/// A computed register detached from its store, so it can be evaluated
/// without holding the store lock.
#[derive(Debug, Clone)]
pub struct ComputedRegister {
    name: RegisterName,
    computed: Computed,
    policy: CoercionPolicy,
}

impl ComputedRegister {
    pub fn name(&self) -> &RegisterName {
        &self.name
    }

    pub fn read(&self) -> Register {
        Register {
            name: self.name.clone(),
            value: (self.computed.getter)(),
            mutable: self.computed.is_mutable(),
            persistent: false,
            timestamp: None,
        }
    }

    /// Coerce `incoming` against the live value and hand it to the setter.
    pub fn write(&self, incoming: &Value) -> Result<Register, RegisterError> {
        let Some(setter) = &self.computed.setter else {
            return Err(RegisterError::immutable(self.name.as_str()));
        };
        let current = (self.computed.getter)();
        let coerced = self.policy.assign(&current, incoming)?;
        setter(coerced);
        Ok(self.read())
    }
}

/// Result of resolving a name in the store.
#[derive(Debug, Clone)]
pub enum Lookup {
    Stored(Register),
    Computed(ComputedRegister),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    flags: RegisterFlags,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum Entry {
    Stored(StoredEntry),
    Computed(Computed),
}

pub struct RegisterStore {
    entries: BTreeMap<RegisterName, Entry>,
    backing: Box<dyn Backing>,
    durable: bool,
    policy: CoercionPolicy,
    dirty: bool,
}

impl fmt::Debug for RegisterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterStore")
            .field("registers", &self.entries.len())
            .field("backing", &self.backing.location())
            .field("policy", &self.policy)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl RegisterStore {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Resolve `name` without evaluating computed registers.
    pub fn lookup(&self, name: &str) -> Result<Lookup, RegisterError> {
        match self.entries.get_key_value(name) {
            Some((key, Entry::Stored(entry))) => {
                Ok(Lookup::Stored(snapshot(key, entry, self.durable)))
            }
            Some((key, Entry::Computed(computed))) => Ok(Lookup::Computed(ComputedRegister {
                name: key.clone(),
                computed: computed.clone(),
                policy: self.policy,
            })),
            None => Err(RegisterError::not_found(name)),
        }
    }

    pub fn get(&self, name: &str) -> Result<Register, RegisterError> {
        match self.lookup(name)? {
            Lookup::Stored(register) => Ok(register),
            Lookup::Computed(computed) => Ok(computed.read()),
        }
    }

    /// Replace the value of `name` with `value` coerced into the stored kind.
    ///
    /// On error the register is left exactly as it was.
    pub fn set(&mut self, name: &str, value: &Value) -> Result<Register, RegisterError> {
        let durable = self.durable;
        let policy = self.policy;
        let Some(key) = self.entries.get_key_value(name).map(|(k, _)| k.clone()) else {
            return Err(RegisterError::not_found(name));
        };
        match self.entries.get_mut(name) {
            Some(Entry::Stored(entry)) => {
                if !entry.flags.mutable {
                    return Err(RegisterError::immutable(name));
                }
                entry.value = policy.assign(&entry.value, value)?;
                entry.timestamp = Some(Utc::now());
                if entry.flags.persistent {
                    self.dirty = true;
                }
                Ok(snapshot(&key, entry, durable))
            }
            Some(Entry::Computed(computed)) => ComputedRegister {
                name: key,
                computed: computed.clone(),
                policy,
            }
            .write(value),
            None => Err(RegisterError::not_found(name)),
        }
    }

    /// Register names in lexicographic order.
    pub fn list(&self) -> Vec<RegisterName> {
        self.entries.keys().cloned().collect()
    }

    /// The `index`-th name in [`list`](Self::list) order.
    pub fn name_at(&self, index: usize) -> Option<RegisterName> {
        self.entries.keys().nth(index).cloned()
    }

    /// Write every persistent register to the backing.
    ///
    /// Does nothing when no persistent register changed since the last
    /// successful flush. Failures are logged and leave the store dirty.
    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let registers: Vec<PersistedRegister> = self
            .entries
            .iter()
            .filter_map(|(name, entry)| match entry {
                Entry::Stored(e) if e.flags.persistent => Some(PersistedRegister {
                    name: name.clone(),
                    value: e.value.clone(),
                    mutable: e.flags.mutable,
                    timestamp: e.timestamp,
                }),
                _ => None,
            })
            .collect();
        match self.backing.store(&registers) {
            Ok(()) => {
                self.dirty = false;
                debug!(
                    location = %self.backing.location(),
                    count = registers.len(),
                    "flushed registers"
                );
                true
            }
            Err(e) => {
                warn!(
                    location = %self.backing.location(),
                    error = %e,
                    "failed to flush registers"
                );
                false
            }
        }
    }
}

impl Drop for RegisterStore {
    fn drop(&mut self) {
        self.flush();
    }
}

fn snapshot(name: &RegisterName, entry: &StoredEntry, durable: bool) -> Register {
    let persistent = entry.flags.persistent && durable;
    Register {
        name: name.clone(),
        value: entry.value.clone(),
        mutable: entry.flags.mutable,
        persistent,
        timestamp: if persistent { entry.timestamp } else { None },
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct StoreBuilder {
    defaults: Vec<(RegisterName, Value, RegisterFlags)>,
    computed: Vec<(RegisterName, Computed)>,
    overrides: Vec<(RegisterName, Value)>,
    backing: Box<dyn Backing>,
    policy: CoercionPolicy,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            defaults: Vec::new(),
            computed: Vec::new(),
            overrides: Vec::new(),
            backing: Box::new(MemoryBacking),
            policy: CoercionPolicy::default(),
        }
    }

    pub fn backing(mut self, backing: impl Backing + 'static) -> Self {
        self.backing = Box::new(backing);
        self
    }

    pub fn policy(mut self, policy: CoercionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declare a compiled-in register and its default value.
    pub fn register(mut self, name: RegisterName, default: impl Into<Value>, flags: RegisterFlags) -> Self {
        self.defaults.push((name, default.into(), flags));
        self
    }

    pub fn computed(mut self, name: RegisterName, computed: Computed) -> Self {
        self.computed.push((name, computed));
        self
    }

    /// Startup overrides, typically from [`plexus_core::assign::parse_environment`].
    pub fn overrides(mut self, overrides: impl IntoIterator<Item = (RegisterName, Value)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn build(self) -> Result<RegisterStore, NodeError> {
        let StoreBuilder {
            defaults,
            computed,
            overrides,
            mut backing,
            policy,
        } = self;
        let now = Utc::now();
        let mut entries = BTreeMap::new();

        // 1. Compiled-in defaults.
        for (name, value, flags) in defaults {
            entries.insert(
                name,
                Entry::Stored(StoredEntry {
                    value,
                    flags,
                    timestamp: Some(now),
                }),
            );
        }
        for (name, c) in computed {
            entries.insert(name, Entry::Computed(c));
        }

        // 2. Durable backing.
        let persisted = backing.load()?;
        let restored = persisted.len();
        for p in persisted {
            match entries.get_mut(p.name.as_str()) {
                Some(Entry::Stored(entry)) => {
                    match CoercionPolicy::Implicit.assign(&entry.value, &p.value) {
                        Ok(value) => {
                            entry.value = value;
                            entry.timestamp = p.timestamp.or(entry.timestamp);
                        }
                        Err(e) => warn!(
                            register = %p.name,
                            error = %e,
                            "persisted value does not fit the default; keeping default"
                        ),
                    }
                }
                Some(Entry::Computed(_)) => {
                    warn!(register = %p.name, "ignoring persisted value of a computed register")
                }
                None => {
                    entries.insert(
                        p.name,
                        Entry::Stored(StoredEntry {
                            value: p.value,
                            flags: RegisterFlags {
                                mutable: p.mutable,
                                persistent: true,
                            },
                            timestamp: p.timestamp,
                        }),
                    );
                }
            }
        }

        // 3. Overrides. Seeding is not a write, so immutable registers accept them.
        let mut dirty = false;
        for (name, value) in overrides {
            match entries.get_mut(name.as_str()) {
                Some(Entry::Stored(entry)) => {
                    entry.value = CoercionPolicy::Implicit
                        .assign(&entry.value, &value)
                        .map_err(|e| {
                            warn!(register = %name, error = %e, "override rejected");
                            e
                        })?;
                    entry.timestamp = Some(now);
                    dirty |= entry.flags.persistent;
                }
                Some(Entry::Computed(_)) => {
                    warn!(register = %name, "override ignored: register is computed")
                }
                None => {
                    debug!(register = %name, kind = %value.kind(), "override defines new register");
                    entries.insert(
                        name,
                        Entry::Stored(StoredEntry {
                            value,
                            flags: RegisterFlags::CONFIG,
                            timestamp: Some(now),
                        }),
                    );
                    dirty = true;
                }
            }
        }

        let durable = backing.is_durable();
        info!(
            location = %backing.location(),
            restored,
            registers = entries.len(),
            "register store ready"
        );
        Ok(RegisterStore {
            entries,
            backing,
            durable,
            policy,
            dirty,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
