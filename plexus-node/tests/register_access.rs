use plexus_core::{Kind, RegisterError, RegisterFlags, RegisterName, Value};
use plexus_node::{AccessService, CoercionPolicy, JsonFileBacking, StoreBuilder};
use tempfile::TempDir;

fn name(raw: &str) -> RegisterName {
    RegisterName::parse(raw).unwrap()
}

fn samples() -> Vec<Value> {
    vec![
        Value::Bit(vec![true]),
        Value::Integer8(vec![-3]),
        Value::Natural64(vec![u64::MAX]),
        Value::Real64(vec![f64::NAN]),
        Value::string("text"),
        Value::unstructured(vec![1, 2, 3]),
    ]
}

#[test]
fn immutable_registers_never_change() {
    let svc = AccessService::new(
        StoreBuilder::new()
            .register(name("ro.id"), vec![7_u16], RegisterFlags::READ_ONLY)
            .build()
            .unwrap(),
    );
    tokio_test::block_on(async {
        for value in samples() {
            let failure = svc.access("ro.id", Some(value)).await.unwrap_err();
            assert_eq!(failure.error, RegisterError::immutable("ro.id"));
        }
        let reg = svc.access("ro.id", None).await.unwrap();
        assert_eq!(reg.value, Value::Natural16(vec![7]));
    });
}

#[test]
fn rejected_writes_keep_stored_kind() {
    let svc = AccessService::new(
        StoreBuilder::new()
            .register(name("pid.gains"), vec![0.1_f32, 0.0, 0.0], RegisterFlags::CONFIG)
            .build()
            .unwrap(),
    );
    tokio_test::block_on(async {
        for value in [Value::string("x"), Value::unstructured(vec![0]), Value::Real32(vec![1.0])] {
            let failure = svc.access("pid.gains", Some(value)).await.unwrap_err();
            assert!(matches!(failure.error, RegisterError::IncompatibleKind { .. }));
            let current = failure.current.unwrap();
            assert_eq!(current.kind(), Kind::Real32);
            assert_eq!(current.value, Value::Real32(vec![0.1, 0.0, 0.0]));
        }
    });
}

#[test]
fn strict_store_accepts_exact_kind_only() {
    let svc = AccessService::new(
        StoreBuilder::new()
            .policy(CoercionPolicy::Strict)
            .register(name("a.b"), vec![1_i32], RegisterFlags::CONFIG)
            .build()
            .unwrap(),
    );
    tokio_test::block_on(async {
        assert!(svc.access("a.b", Some(Value::Integer64(vec![2]))).await.is_err());
        let reg = svc.access("a.b", Some(Value::Integer32(vec![2]))).await.unwrap();
        assert_eq!(reg.value, Value::Integer32(vec![2]));
    });
}

#[test]
fn flush_is_idempotent_and_durable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state").join("registers.json");
    let svc = AccessService::new(
        StoreBuilder::new()
            .backing(JsonFileBacking::new(&path))
            .register(name("uavcan.node.id"), vec![0_u16], RegisterFlags::CONFIG)
            .build()
            .unwrap(),
    );
    tokio_test::block_on(async {
        assert!(!svc.flush().await, "clean store has nothing to flush");
        svc.access("uavcan.node.id", Some(Value::Natural16(vec![9])))
            .await
            .unwrap();
        assert!(svc.flush().await);
        assert!(!svc.flush().await);
    });
    assert!(path.exists());
}
