mod test_harness;

use std::sync::Arc;

use test_harness::{add_task, RecordingDelivery};
use uuid::Uuid;
use workmesh::coordinator::{DispatchRouter, WorkerRegistry};
use workmesh::error::DispatchError;
use workmesh::task::{encode_value, TaskResult, Value};

fn router_with(delivery: Arc<RecordingDelivery>) -> DispatchRouter {
    DispatchRouter::new(Arc::new(WorkerRegistry::new()), delivery, 100)
}

#[tokio::test]
async fn test_submit_without_workers_is_rejected() {
    let delivery = RecordingDelivery::new();
    let router = router_with(delivery.clone());
    let task = add_task(1, 2);

    let err = router.submit(&task).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoAvailableWorker));
    assert!(router.owner_of(&task.task_id).is_none());
    assert_eq!(router.pending_count(), 0);
    assert!(delivery.delivered().is_empty());
}

#[tokio::test]
async fn test_single_worker_receives_task() {
    let delivery = RecordingDelivery::new();
    let router = router_with(delivery.clone());
    router.registry().register("w1", "http://127.0.0.1:1");
    let task = add_task(3, 4);

    let assignment = router.submit(&task).await.unwrap();
    assert_eq!(assignment.worker_id, "w1");
    assert_eq!(assignment.task_id, task.task_id);
    assert_eq!(router.owner_of(&task.task_id).as_deref(), Some("w1"));
    assert!(router
        .registry()
        .get("w1")
        .unwrap()
        .active_tasks
        .contains(&task.task_id));
    assert_eq!(delivery.delivered(), vec![("w1".to_string(), task.task_id)]);
}

#[tokio::test]
async fn test_least_loaded_worker_is_chosen() {
    let delivery = RecordingDelivery::new();
    let router = router_with(delivery.clone());
    router.registry().register("loaded", "http://a");
    router.registry().register("spare", "http://b");
    router.registry().assign("loaded", Uuid::new_v4());
    router.registry().assign("loaded", Uuid::new_v4());

    let assignment = router.submit(&add_task(1, 1)).await.unwrap();
    assert_eq!(assignment.worker_id, "spare");
}

#[tokio::test]
async fn test_submissions_spread_across_idle_workers() {
    let delivery = RecordingDelivery::new();
    let router = router_with(delivery.clone());
    router.registry().register("w1", "http://a");
    router.registry().register("w2", "http://b");

    let first = router.submit(&add_task(1, 1)).await.unwrap();
    let second = router.submit(&add_task(2, 2)).await.unwrap();
    assert_eq!(first.worker_id, "w1");
    assert_eq!(second.worker_id, "w2");
}

#[tokio::test]
async fn test_result_clears_ownership() {
    let router = router_with(RecordingDelivery::new());
    router.registry().register("w1", "http://a");
    let task = add_task(3, 4);
    router.submit(&task).await.unwrap();

    let bytes = encode_value(&Value::I32(7)).unwrap();
    let owner = router
        .report_result(TaskResult::success(task.task_id, bytes))
        .await;

    assert_eq!(owner.as_deref(), Some("w1"));
    assert!(router.owner_of(&task.task_id).is_none());
    assert_eq!(router.registry().get("w1").unwrap().active_count(), 0);

    let stored = router.result(&task.task_id).await.unwrap();
    assert!(stored.is_success());
}

#[tokio::test]
async fn test_failed_result_also_clears_ownership() {
    let router = router_with(RecordingDelivery::new());
    router.registry().register("w1", "http://a");
    let task = add_task(3, 4);
    router.submit(&task).await.unwrap();

    router
        .report_result(TaskResult::failure(task.task_id, "invocation error: trap"))
        .await;

    assert_eq!(router.pending_count(), 0);
    let stored = router.result(&task.task_id).await.unwrap();
    assert_eq!(stored.error_message(), Some("invocation error: trap"));
}

#[tokio::test]
async fn test_unknown_result_is_a_noop() {
    let router = router_with(RecordingDelivery::new());
    router.registry().register("w1", "http://a");
    let task = add_task(1, 2);
    router.submit(&task).await.unwrap();

    let stray = Uuid::new_v4();
    let owner = router
        .report_result(TaskResult::failure(stray, "late"))
        .await;

    assert!(owner.is_none());
    assert!(router.result(&stray).await.is_none());
    assert_eq!(router.pending_count(), 1);
    assert_eq!(router.registry().get("w1").unwrap().active_count(), 1);
}

#[tokio::test]
async fn test_transport_failure_rolls_back_ownership() {
    let delivery = RecordingDelivery::failing();
    let router = router_with(delivery.clone());
    router.registry().register("w1", "http://a");
    let task = add_task(1, 2);

    let err = router.submit(&task).await.unwrap_err();
    assert!(matches!(err, DispatchError::DispatchTransport { ref worker_id, .. } if worker_id == "w1"));
    assert!(router.owner_of(&task.task_id).is_none());
    assert_eq!(router.registry().get("w1").unwrap().active_count(), 0);

    // The same task can be submitted again once the worker is reachable
    delivery.set_failing(false);
    assert!(router.submit(&task).await.is_ok());
}

#[tokio::test]
async fn test_duplicate_in_flight_task_is_rejected() {
    let delivery = RecordingDelivery::new();
    let router = router_with(delivery.clone());
    router.registry().register("w1", "http://a");
    router.registry().register("w2", "http://b");
    let task = add_task(1, 2);

    router.submit(&task).await.unwrap();
    let err = router.submit(&task).await.unwrap_err();

    assert!(matches!(err, DispatchError::DuplicateTask(id) if id == task.task_id));
    assert_eq!(delivery.delivered().len(), 1);
    let total: usize = router
        .registry()
        .list()
        .iter()
        .map(|w| w.active_count())
        .sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_concurrent_submissions_balance_load() {
    let delivery = RecordingDelivery::new();
    let router = Arc::new(router_with(delivery.clone()));
    for id in ["w1", "w2", "w3"] {
        router.registry().register(id, "http://x");
    }

    let mut handles = Vec::new();
    for i in 0..30 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router.submit(&add_task(i, i)).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(router.pending_count(), 30);
    let counts: Vec<usize> = router
        .registry()
        .list()
        .iter()
        .map(|w| w.active_count())
        .collect();
    assert_eq!(counts.iter().sum::<usize>(), 30);
    assert!(counts.iter().all(|c| *c >= 1));
}
