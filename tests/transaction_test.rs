use parking_lot::Mutex;
use proptest::prelude::*;
use sprig::beans::{ComponentType, Container, Definition, Visibility};
use sprig::transaction::{
    transaction_advisor, CompletionStatus, Connection, ConnectionFactory, ConnectionHolder, Propagation,
    ResourceHolder, ResourceHolderSupport, ResourceTransactionManager, Savepoint, SavepointManager,
    TransactionDefinition, TransactionManager, TransactionObject, TransactionSynchronization,
    TransactionSynchronizationManager,
};
use sprig::{BoxError, Component, InvocationError, TransactionError, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[derive(Debug)]
struct FakeConnection {
    id: usize,
    log: Log,
    savepoints: bool,
    fail_set_savepoint: bool,
    auto_commit: AtomicBool,
    next_savepoint: AtomicUsize,
}

impl FakeConnection {
    fn new(id: usize, log: Log) -> Self {
        Self {
            id,
            log,
            savepoints: true,
            fail_set_savepoint: false,
            auto_commit: AtomicBool::new(true),
            next_savepoint: AtomicUsize::new(0),
        }
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", self.id, event));
    }
}

impl Connection for FakeConnection {
    fn supports_savepoints(&self) -> Result<bool, BoxError> {
        Ok(self.savepoints)
    }

    fn set_savepoint(&self, name: &str) -> Result<Savepoint, BoxError> {
        if self.fail_set_savepoint {
            return Err("savepoint limit reached".into());
        }
        self.record(&format!("savepoint {}", name));
        Ok(Savepoint {
            id: self.next_savepoint.fetch_add(1, Ordering::SeqCst) as u64,
            name: name.to_string(),
        })
    }

    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), BoxError> {
        self.record(&format!("rollback to {}", savepoint.name));
        Ok(())
    }

    fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), BoxError> {
        self.record(&format!("release {}", savepoint.name));
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, BoxError> {
        Ok(self.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), BoxError> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        self.record(&format!("auto_commit={}", auto_commit));
        Ok(())
    }

    fn isolation_level(&self) -> Result<i32, BoxError> {
        Ok(2)
    }

    fn set_isolation_level(&self, level: i32) -> Result<(), BoxError> {
        self.record(&format!("isolation={}", level));
        Ok(())
    }

    fn set_read_only(&self, read_only: bool) -> Result<(), BoxError> {
        self.record(&format!("read_only={}", read_only));
        Ok(())
    }

    fn commit(&self) -> Result<(), BoxError> {
        self.record("commit");
        Ok(())
    }

    fn rollback(&self) -> Result<(), BoxError> {
        self.record("rollback");
        Ok(())
    }

    fn close(&self) -> Result<(), BoxError> {
        self.record("close");
        Ok(())
    }
}

struct FakeFactory {
    log: Log,
    opened: AtomicUsize,
}

impl ConnectionFactory for FakeFactory {
    fn resource_key(&self) -> &str {
        "orders-db"
    }

    fn connect(&self) -> Result<Arc<dyn Connection>, BoxError> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(FakeConnection::new(id, self.log.clone())))
    }
}

fn manager(log: &Log) -> ResourceTransactionManager {
    let factory = Arc::new(FakeFactory {
        log: log.clone(),
        opened: AtomicUsize::new(0),
    });
    ResourceTransactionManager::new(factory, Arc::new(TransactionSynchronizationManager::new()))
}

#[derive(Debug, Default)]
struct SimpleHolder {
    support: ResourceHolderSupport,
}

impl ResourceHolder for SimpleHolder {
    fn is_void(&self) -> bool {
        self.support.is_void()
    }

    fn unbound(&self) {
        self.support.unbound();
    }
}

// ----------------------------------------------------------------------
// 资源绑定
// ----------------------------------------------------------------------

#[test]
fn bind_and_unbind_resources() {
    let sync = TransactionSynchronizationManager::new();
    let holder: Arc<dyn ResourceHolder> = Arc::new(SimpleHolder::default());
    sync.bind_resource("ds", holder.clone()).unwrap();
    assert!(sync.has_resource("ds"));

    let other: Arc<dyn ResourceHolder> = Arc::new(SimpleHolder::default());
    assert!(matches!(
        sync.bind_resource("ds", other),
        Err(TransactionError::AlreadyBound { key, .. }) if key == "ds"
    ));
    let bound = sync.get_resource("ds").unwrap();
    assert!(std::ptr::addr_eq(Arc::as_ptr(&bound), Arc::as_ptr(&holder)));

    sync.unbind_resource("ds").unwrap();
    assert!(matches!(sync.unbind_resource("ds"), Err(TransactionError::NotBound { .. })));
    assert!(sync.unbind_resource_if_possible("ds").is_none());
    assert_eq!(sync.tracked_threads(), 0);
}

#[test]
fn void_holders_are_evicted_on_lookup() {
    let sync = TransactionSynchronizationManager::new();
    let holder = Arc::new(SimpleHolder::default());
    sync.bind_resource("ds", holder.clone()).unwrap();

    holder.unbound();
    assert!(sync.get_resource("ds").is_none());
    assert!(sync.resource_map().is_empty());
    assert_eq!(sync.tracked_threads(), 0);

    // void 持有者不妨碍重新绑定
    let void = Arc::new(SimpleHolder::default());
    sync.bind_resource("ds", void.clone()).unwrap();
    void.unbound();
    sync.bind_resource("ds", Arc::new(SimpleHolder::default())).unwrap();
    assert!(sync.has_resource("ds"));
}

#[test]
fn resources_are_isolated_per_thread() {
    let sync = Arc::new(TransactionSynchronizationManager::new());
    sync.bind_resource("ds", Arc::new(SimpleHolder::default())).unwrap();

    let worker = {
        let sync = sync.clone();
        thread::spawn(move || {
            assert!(!sync.has_resource("ds"));
            sync.bind_resource("ds", Arc::new(SimpleHolder::default())).unwrap();
            assert_eq!(sync.tracked_threads(), 2);
            sync.unbind_resource("ds").unwrap();
        })
    };
    worker.join().unwrap();

    assert!(sync.has_resource("ds"));
    assert_eq!(sync.tracked_threads(), 1);
}

#[test]
fn clear_keeps_bound_resources() {
    let sync = TransactionSynchronizationManager::new();
    sync.bind_resource("ds", Arc::new(SimpleHolder::default())).unwrap();
    sync.init_synchronization().unwrap();
    sync.set_current_transaction_name(Some("orders"));
    assert!(matches!(sync.init_synchronization(), Err(TransactionError::SynchronizationActive)));

    sync.clear().unwrap();
    assert!(!sync.is_synchronization_active());
    assert_eq!(sync.current_transaction_name(), None);
    assert!(sync.has_resource("ds"));
}

// ----------------------------------------------------------------------
// 同步回调
// ----------------------------------------------------------------------

struct Ordered {
    order: i32,
    index: usize,
}

impl TransactionSynchronization for Ordered {
    fn order(&self) -> i32 {
        self.order
    }
}

proptest! {
    #[test]
    fn synchronizations_are_sorted_by_order_then_registration(orders in proptest::collection::vec(-3i32..3, 0..12)) {
        let sync = TransactionSynchronizationManager::new();
        sync.init_synchronization().unwrap();
        let registered: Vec<Arc<Ordered>> = orders
            .iter()
            .enumerate()
            .map(|(index, order)| Arc::new(Ordered { order: *order, index }))
            .collect();
        for synchronization in &registered {
            sync.register_synchronization(synchronization.clone()).unwrap();
        }
        // 重复注册被忽略
        if let Some(first) = registered.first() {
            sync.register_synchronization(first.clone()).unwrap();
        }

        let sorted = sync.synchronizations().unwrap();
        prop_assert_eq!(sorted.len(), orders.len());
        let mut expected: Vec<(i32, usize)> = orders.iter().copied().zip(0..).collect();
        expected.sort_by_key(|(order, _)| *order);
        let actual: Vec<i32> = sorted.iter().map(|s| s.order()).collect();
        prop_assert_eq!(actual, expected.iter().map(|(order, _)| *order).collect::<Vec<_>>());

        let indexes: Vec<usize> = sorted
            .iter()
            .filter_map(|s| registered.iter().find(|r| std::ptr::addr_eq(Arc::as_ptr(*r), Arc::as_ptr(s))))
            .map(|r| r.index)
            .collect();
        prop_assert_eq!(indexes, expected.iter().map(|(_, index)| *index).collect::<Vec<_>>());
        sync.clear().unwrap();
    }
}

#[test]
fn registration_requires_active_synchronization() {
    let sync = TransactionSynchronizationManager::new();
    assert!(matches!(
        sync.register_synchronization(Arc::new(Ordered { order: 0, index: 0 })),
        Err(TransactionError::SynchronizationInactive)
    ));
    assert!(matches!(sync.synchronizations(), Err(TransactionError::SynchronizationInactive)));
}

struct Recorder {
    log: Log,
}

impl TransactionSynchronization for Recorder {
    fn flush(&self) {
        self.log.lock().push("flush".to_string());
    }

    fn before_commit(&self, read_only: bool) -> Result<(), BoxError> {
        self.log.lock().push(format!("before_commit read_only={}", read_only));
        Ok(())
    }

    fn before_completion(&self) {
        self.log.lock().push("before_completion".to_string());
    }

    fn after_commit(&self) {
        self.log.lock().push("after_commit".to_string());
    }

    fn after_completion(&self, status: CompletionStatus) {
        self.log.lock().push(format!("after_completion {:?}", status));
    }
}

#[test]
fn commit_runs_synchronization_callbacks_in_order() {
    let log = new_log();
    let tx = manager(&log);
    let status = tx.begin(&TransactionDefinition::default().named("orders")).unwrap();
    assert!(status.is_new_transaction());
    assert!(status.is_new_synchronization());
    assert_eq!(tx.synchronization().current_transaction_name().as_deref(), Some("orders"));
    assert!(tx.synchronization().is_actual_transaction_active());

    let events = new_log();
    tx.synchronization()
        .register_synchronization(Arc::new(Recorder { log: events.clone() }))
        .unwrap();
    tx.commit(status).unwrap();

    assert_eq!(
        entries(&events),
        vec![
            "flush",
            "before_commit read_only=false",
            "before_completion",
            "after_commit",
            "after_completion Committed"
        ]
    );
    assert_eq!(
        entries(&log),
        vec!["1:auto_commit=false", "1:commit", "1:auto_commit=true", "1:close"]
    );
    assert_eq!(tx.synchronization().tracked_threads(), 0);
}

#[test]
fn rollback_reports_rolled_back_completion() {
    let log = new_log();
    let tx = manager(&log);
    let status = tx
        .begin(&TransactionDefinition::default().read_only().with_isolation_level(8))
        .unwrap();
    let events = new_log();
    tx.synchronization()
        .register_synchronization(Arc::new(Recorder { log: events.clone() }))
        .unwrap();
    tx.rollback(status).unwrap();

    assert_eq!(entries(&events), vec!["before_completion", "after_completion RolledBack"]);
    assert_eq!(
        entries(&log),
        vec![
            "1:read_only=true",
            "1:isolation=8",
            "1:auto_commit=false",
            "1:rollback",
            "1:auto_commit=true",
            "1:isolation=2",
            "1:close"
        ]
    );
}

// ----------------------------------------------------------------------
// 保存点
// ----------------------------------------------------------------------

fn holder_with(connection: FakeConnection) -> Arc<ConnectionHolder> {
    Arc::new(ConnectionHolder::new(Arc::new(connection)))
}

#[test]
fn savepoints_need_permission_and_support() {
    let log = new_log();

    let mut disallowed = TransactionObject::new(false);
    disallowed.set_holder(Some(holder_with(FakeConnection::new(1, log.clone()))), false);
    assert!(matches!(
        disallowed.create_savepoint(),
        Err(TransactionError::NestedNotSupported { .. })
    ));

    let mut unsupported = TransactionObject::new(true);
    let mut connection = FakeConnection::new(2, log.clone());
    connection.savepoints = false;
    unsupported.set_holder(Some(holder_with(connection)), false);
    assert!(matches!(
        unsupported.create_savepoint(),
        Err(TransactionError::NestedNotSupported { .. })
    ));

    let mut failing = TransactionObject::new(true);
    let mut connection = FakeConnection::new(3, log.clone());
    connection.fail_set_savepoint = true;
    failing.set_holder(Some(holder_with(connection)), false);
    assert!(matches!(
        failing.create_savepoint(),
        Err(TransactionError::CannotCreate { source: Some(_), .. })
    ));

    let mut working = TransactionObject::new(true);
    working.set_holder(Some(holder_with(FakeConnection::new(4, log.clone()))), false);
    let first = working.create_savepoint().unwrap();
    let second = working.create_savepoint().unwrap();
    assert_eq!(first.name, "SAVEPOINT_1");
    assert_eq!(second.name, "SAVEPOINT_2");
    working.rollback_to_savepoint(&second).unwrap();
    working.release_savepoint(&first);
    assert_eq!(
        entries(&log),
        vec!["4:savepoint SAVEPOINT_1", "4:savepoint SAVEPOINT_2", "4:rollback to SAVEPOINT_2", "4:release SAVEPOINT_1"]
    );
}

// ----------------------------------------------------------------------
// 传播行为
// ----------------------------------------------------------------------

#[test]
fn participating_failure_rolls_back_the_outer_transaction() {
    let log = new_log();
    let tx = manager(&log);
    let outer = tx.begin(&TransactionDefinition::default()).unwrap();
    let inner = tx.begin(&TransactionDefinition::new(Propagation::Mandatory)).unwrap();
    assert!(inner.has_transaction());
    assert!(!inner.is_new_transaction());
    assert!(!inner.is_new_synchronization());

    tx.rollback(inner).unwrap();
    assert!(outer.is_global_rollback_only());

    let err = tx.commit(outer).unwrap_err();
    assert!(err.to_string().contains("marked as rollback-only"));
    assert_eq!(
        entries(&log),
        vec!["1:auto_commit=false", "1:rollback", "1:auto_commit=true", "1:close"]
    );
    assert!(tx.current_connection().is_none());
}

#[test]
fn local_rollback_only_rolls_back_on_commit() {
    let log = new_log();
    let tx = manager(&log);
    let mut status = tx.begin(&TransactionDefinition::default()).unwrap();
    status.set_rollback_only();
    tx.commit(status).unwrap();
    assert!(entries(&log).contains(&"1:rollback".to_string()));
    assert!(!entries(&log).contains(&"1:commit".to_string()));
}

#[test]
fn requires_new_suspends_and_resumes_the_outer_transaction() {
    let log = new_log();
    let tx = manager(&log);
    let outer = tx.begin(&TransactionDefinition::default().named("outer")).unwrap();
    let outer_events = new_log();
    tx.synchronization()
        .register_synchronization(Arc::new(Recorder { log: outer_events.clone() }))
        .unwrap();
    let outer_connection = tx.current_connection().unwrap();

    let inner = tx
        .begin(&TransactionDefinition::new(Propagation::RequiresNew).named("inner"))
        .unwrap();
    assert!(inner.is_new_transaction());
    assert!(inner.has_suspended_resources());
    assert_eq!(tx.synchronization().current_transaction_name().as_deref(), Some("inner"));
    assert!(tx.synchronization().synchronizations().unwrap().is_empty());
    let inner_connection = tx.current_connection().unwrap();
    assert!(!std::ptr::addr_eq(Arc::as_ptr(&inner_connection), Arc::as_ptr(&outer_connection)));

    tx.commit(inner).unwrap();
    assert_eq!(tx.synchronization().current_transaction_name().as_deref(), Some("outer"));
    assert_eq!(tx.synchronization().synchronizations().unwrap().len(), 1);
    assert!(std::ptr::addr_eq(
        Arc::as_ptr(&tx.current_connection().unwrap()),
        Arc::as_ptr(&outer_connection)
    ));
    assert!(entries(&outer_events).is_empty());

    tx.commit(outer).unwrap();
    assert_eq!(
        entries(&log),
        vec![
            "1:auto_commit=false",
            "2:auto_commit=false",
            "2:commit",
            "2:auto_commit=true",
            "2:close",
            "1:commit",
            "1:auto_commit=true",
            "1:close"
        ]
    );
    assert_eq!(entries(&outer_events).last().map(String::as_str), Some("after_completion Committed"));
}

#[test]
fn not_supported_runs_without_the_outer_connection() {
    let log = new_log();
    let tx = manager(&log);
    let outer = tx.begin(&TransactionDefinition::default()).unwrap();

    let inner = tx.begin(&TransactionDefinition::new(Propagation::NotSupported)).unwrap();
    assert!(!inner.has_transaction());
    assert!(tx.current_connection().is_none());
    assert!(!tx.synchronization().is_actual_transaction_active());

    tx.commit(inner).unwrap();
    assert!(tx.current_connection().is_some());
    tx.commit(outer).unwrap();
}

#[test]
fn nested_transaction_rolls_back_to_its_savepoint() {
    let log = new_log();
    let tx = manager(&log);
    let outer = tx.begin(&TransactionDefinition::default()).unwrap();

    let nested = tx.begin(&TransactionDefinition::new(Propagation::Nested)).unwrap();
    assert!(nested.has_savepoint());
    assert!(!nested.is_new_transaction());
    tx.rollback(nested).unwrap();
    assert!(!outer.is_rollback_only());

    let committed = tx.begin(&TransactionDefinition::new(Propagation::Nested)).unwrap();
    tx.commit(committed).unwrap();
    tx.commit(outer).unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "1:auto_commit=false",
            "1:savepoint SAVEPOINT_1",
            "1:rollback to SAVEPOINT_1",
            "1:release SAVEPOINT_1",
            "1:savepoint SAVEPOINT_2",
            "1:release SAVEPOINT_2",
            "1:commit",
            "1:auto_commit=true",
            "1:close"
        ]
    );
}

#[test]
fn nested_transactions_can_be_disallowed() {
    let log = new_log();
    let tx = manager(&log).with_nested_transaction_allowed(false);
    let outer = tx.begin(&TransactionDefinition::default()).unwrap();
    assert!(matches!(
        tx.begin(&TransactionDefinition::new(Propagation::Nested)),
        Err(TransactionError::NestedNotSupported { .. })
    ));
    tx.rollback(outer).unwrap();
}

#[test]
fn mandatory_and_never_check_for_an_existing_transaction() {
    let log = new_log();
    let tx = manager(&log);
    assert!(matches!(
        tx.begin(&TransactionDefinition::new(Propagation::Mandatory)),
        Err(TransactionError::IllegalState(_))
    ));

    let empty = tx.begin(&TransactionDefinition::new(Propagation::Supports)).unwrap();
    assert!(!empty.has_transaction());
    assert!(empty.is_new_synchronization());
    tx.commit(empty).unwrap();
    assert!(entries(&log).is_empty());

    let outer = tx.begin(&TransactionDefinition::default()).unwrap();
    assert!(matches!(
        tx.begin(&TransactionDefinition::new(Propagation::Never)),
        Err(TransactionError::IllegalState(_))
    ));
    tx.commit(outer).unwrap();
    assert_eq!(tx.synchronization().tracked_threads(), 0);
}

// ----------------------------------------------------------------------
// 拦截器
// ----------------------------------------------------------------------

struct OrderService {
    tx: Arc<ResourceTransactionManager>,
}

impl Component for OrderService {
    fn dispatch(&self, operation: &str, args: &[Value]) -> Result<Value, InvocationError> {
        match operation {
            "place" | "peek" => Ok(Value::Bool(self.tx.current_connection().is_some())),
            "reject" => Err(InvocationError::target(format!(
                "order {:?} rejected",
                args.first().and_then(Value::as_int)
            ))),
            "name" => Ok(Value::from(
                self.tx.synchronization().current_transaction_name().unwrap_or_default(),
            )),
            _ => Err(InvocationError::NoSuchOperation {
                type_name: "OrderService".to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

#[test]
fn transactional_operations_run_inside_a_transaction() {
    let log = new_log();
    let tx = Arc::new(manager(&log));
    let container = Container::new();
    let service_tx = tx.clone();
    container.register_type(
        ComponentType::builder("OrderService")
            .constructor(Visibility::Public, &[], move |_| {
                Ok(Arc::new(OrderService { tx: service_tx.clone() }))
            })
            .operation_with("place", &[("transactional", "")])
            .operation_with("reject", &[("transactional", "requires_new")])
            .operation_with("name", &[("transactional", "read_only")])
            .operation("peek")
            .build(),
    );
    container.add_advisor(Arc::new(transaction_advisor(tx.clone())));
    container
        .register_definition(Definition::new("orders", "OrderService").intercepted())
        .unwrap();
    let orders = container.resolve("orders").unwrap();

    assert_eq!(orders.dispatch("place", &[]).unwrap(), Value::Bool(true));
    assert_eq!(orders.dispatch("peek", &[]).unwrap(), Value::Bool(false));
    assert_eq!(orders.dispatch("name", &[]).unwrap(), Value::from("OrderService.name"));
    assert_eq!(
        entries(&log)[..4],
        ["1:auto_commit=false", "1:commit", "1:auto_commit=true", "1:close"]
    );

    log.lock().clear();
    let err = orders.dispatch("reject", &[Value::Int(7)]).unwrap_err();
    assert!(err.is_target());
    assert_eq!(err.to_string(), "order Some(7) rejected");
    assert_eq!(
        entries(&log),
        vec!["3:auto_commit=false", "3:rollback", "3:auto_commit=true", "3:close"]
    );
    assert!(tx.current_connection().is_none());
}
