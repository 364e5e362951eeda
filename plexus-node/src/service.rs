//! Register access service: List / Access over one shared store.
//!
//! All store operations are linearized by one `tokio::sync::Mutex`. Computed
//! registers are detached from the store under the lock and evaluated after
//! it is released. Computed writes (getter, coercion, setter) are serialized
//! among themselves by a second lock, so two writers never interleave.

use std::sync::Arc;

use plexus_core::{Register, RegisterError, RegisterName, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{Lookup, RegisterStore};

/// A refused access. `current` is the register as it stands, when it exists.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessFailure {
    pub error: RegisterError,
    pub current: Option<Register>,
}

impl AccessFailure {
    fn missing(error: RegisterError) -> Self {
        Self {
            error,
            current: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessService {
    store: Arc<Mutex<RegisterStore>>,
    computed_writes: Arc<Mutex<()>>,
}

impl AccessService {
    pub fn new(store: RegisterStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            computed_writes: Arc::new(Mutex::new(())),
        }
    }

    /// Shared handle to the underlying store for in-process business logic.
    pub fn store(&self) -> Arc<Mutex<RegisterStore>> {
        Arc::clone(&self.store)
    }

    pub async fn list(&self) -> Vec<RegisterName> {
        self.store.lock().await.list()
    }

    pub async fn name_at(&self, index: usize) -> Option<RegisterName> {
        self.store.lock().await.name_at(index)
    }

    /// Read `name` when `value` is `None`, otherwise write it.
    ///
    /// A successful write returns the register as stored after coercion.
    pub async fn access(
        &self,
        name: &str,
        value: Option<Value>,
    ) -> Result<Register, AccessFailure> {
        let Some(value) = value else {
            let lookup = self.store.lock().await.lookup(name);
            return match lookup.map_err(AccessFailure::missing)? {
                Lookup::Stored(register) => Ok(register),
                Lookup::Computed(computed) => Ok(computed.read()),
            };
        };

        let mut store = self.store.lock().await;
        let result = match store.lookup(name).map_err(AccessFailure::missing)? {
            Lookup::Stored(_) => store.set(name, &value).map_err(|error| AccessFailure {
                error,
                current: store.get(name).ok(),
            }),
            Lookup::Computed(computed) => {
                drop(store);
                let _serialized = self.computed_writes.lock().await;
                computed.write(&value).map_err(|error| AccessFailure {
                    error,
                    current: Some(computed.read()),
                })
            }
        };
        match &result {
            Ok(register) => debug!(register = %name, value = %register.value, "register written"),
            Err(failure) => debug!(register = %name, error = %failure.error, "register write rejected"),
        }
        result
    }

    pub async fn flush(&self) -> bool {
        self.store.lock().await.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Computed, StoreBuilder};
    use plexus_core::{Kind, RegisterFlags};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn name(raw: &str) -> RegisterName {
        RegisterName::parse(raw).unwrap()
    }

    fn service() -> AccessService {
        let ticks = Arc::new(AtomicU32::new(0));
        AccessService::new(
            StoreBuilder::new()
                .register(name("thermostat.pid.gains"), vec![0.1_f32, 0.0, 0.0], RegisterFlags::CONFIG)
                .register(name("counter.total"), vec![0_u64], RegisterFlags::CONFIG)
                .register(name("board.serial"), "A1", RegisterFlags::READ_ONLY)
                .computed(
                    name("sys.ticks"),
                    Computed::read_only(move || {
                        Value::Natural32(vec![ticks.fetch_add(1, Ordering::SeqCst)])
                    }),
                )
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn read_returns_register() {
        let svc = service();
        let reg = svc.access("thermostat.pid.gains", None).await.unwrap();
        assert_eq!(reg.kind(), Kind::Real32);
        assert!(reg.mutable);
    }

    #[tokio::test]
    async fn write_returns_stored_representation() {
        let svc = service();
        let reg = svc
            .access("thermostat.pid.gains", Some(Value::Real64(vec![0.5, 0.25, 0.0])))
            .await
            .unwrap();
        assert_eq!(reg.value, Value::Real32(vec![0.5, 0.25, 0.0]));
    }

    #[tokio::test]
    async fn write_to_unknown_name_is_not_found() {
        let svc = service();
        let failure = svc
            .access("no.such", Some(Value::Natural8(vec![1])))
            .await
            .unwrap_err();
        assert_eq!(failure.error, RegisterError::not_found("no.such"));
        assert!(failure.current.is_none());
        assert_eq!(svc.list().await.len(), 4);
    }

    #[tokio::test]
    async fn immutable_write_reports_current_value() {
        let svc = service();
        let failure = svc
            .access("board.serial", Some(Value::string("B2")))
            .await
            .unwrap_err();
        assert_eq!(failure.error, RegisterError::immutable("board.serial"));
        assert_eq!(failure.current.unwrap().value, Value::string("A1"));
    }

    #[tokio::test]
    async fn incompatible_write_keeps_real32_value() {
        let svc = service();
        let failure = svc
            .access("thermostat.pid.gains", Some(Value::string("fast")))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, RegisterError::IncompatibleKind { .. }));
        let reg = svc.access("thermostat.pid.gains", None).await.unwrap();
        assert_eq!(reg.value, Value::Real32(vec![0.1, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn computed_register_is_recomputed_per_read() {
        let svc = service();
        let first = svc.access("sys.ticks", None).await.unwrap();
        let second = svc.access("sys.ticks", None).await.unwrap();
        assert_ne!(first.value, second.value);
        assert!(!second.persistent && second.timestamp.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accesses_are_linearized() {
        let svc = service();
        let inputs = vec![
            Value::Real64(vec![1.5, 2.5, 3.5]),
            Value::Integer16(vec![-4, 5, -6]),
            Value::Natural8(vec![7, 8, 9]),
            Value::Bit(vec![true, false, true]),
            Value::Integer64(vec![100, -200, 300]),
        ];
        let expected: Vec<Value> = inputs
            .iter()
            .map(|v| v.coerce(Kind::Real32).unwrap())
            .collect();

        let mut tasks = Vec::new();
        for round in 0..8 {
            for (i, input) in inputs.iter().enumerate() {
                let svc = svc.clone();
                let input = input.clone();
                tasks.push(tokio::spawn(async move {
                    if round % 2 == 1 {
                        tokio::task::yield_now().await;
                    }
                    (i, svc.access("thermostat.pid.gains", Some(input)).await.unwrap())
                }));
            }
        }
        for task in tasks {
            let (i, reg) = task.await.unwrap();
            assert_eq!(reg.kind(), Kind::Real32);
            // The returned register is the state this write left behind.
            assert_eq!(reg.value, expected[i]);
        }

        let last = svc.access("thermostat.pid.gains", None).await.unwrap();
        assert!(expected.contains(&last.value), "unexpected final value {}", last.value);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn computed_writes_never_overlap() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Mutex as StdMutex;

        let busy = Arc::new(AtomicBool::new(false));
        let level = Arc::new(StdMutex::new(0_u32));
        let getter_level = Arc::clone(&level);
        let setter_level = Arc::clone(&level);
        let setter_busy = Arc::clone(&busy);
        let svc = AccessService::new(
            StoreBuilder::new()
                .computed(
                    name("motor.level"),
                    Computed::read_write(
                        move || Value::Natural32(vec![*getter_level.lock().unwrap()]),
                        move |value| {
                            assert!(!setter_busy.swap(true, Ordering::SeqCst), "overlapping write");
                            std::thread::sleep(std::time::Duration::from_millis(2));
                            if let Value::Natural32(v) = value {
                                *setter_level.lock().unwrap() = v[0];
                            }
                            setter_busy.store(false, Ordering::SeqCst);
                        },
                    ),
                )
                .build()
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..16_u16 {
            let svc = svc.clone();
            tasks.push(tokio::spawn(async move {
                svc.access("motor.level", Some(Value::Natural16(vec![i])))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().kind(), Kind::Natural32);
        }
        assert!(!busy.load(Ordering::SeqCst));
    }
}
