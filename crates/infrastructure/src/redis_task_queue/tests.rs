use std::time::Duration;

use drover_application::{QueueName, SUBSCRIPTION_BUFFER, Task, TaskQueue};
use drover_core::AppError;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{RedisTaskQueue, TaskEnvelope};

fn task(id: &str) -> Task {
    Task {
        id: id.to_owned(),
        payload: br#"{"stepRunId":"s"}"#.to_vec(),
        metadata: br#"{"tenantId":"t"}"#.to_vec(),
    }
}

fn test_queue() -> Option<RedisTaskQueue> {
    let Ok(redis_url) = std::env::var("REDIS_URL") else {
        return None;
    };

    let client = match redis::Client::open(redis_url.as_str()) {
        Ok(client) => client,
        Err(error) => panic!("failed to open REDIS_URL in test: {error}"),
    };

    Some(RedisTaskQueue::new(
        client,
        format!("drover-test-{}", Uuid::new_v4()),
    ))
}

#[test]
fn envelope_keeps_binary_payloads_intact() {
    let original = Task {
        id: "step-run-timed-out".to_owned(),
        payload: vec![0, 159, 146, 150],
        metadata: b"{}".to_vec(),
    };

    let encoded = TaskEnvelope::encode(&original);
    assert!(encoded.is_ok());
    let decoded = TaskEnvelope::decode(encoded.unwrap_or_default().as_str());
    assert!(matches!(decoded, Ok(task) if task == original));
}

#[test]
fn malformed_envelope_is_a_decode_error() {
    let decoded = TaskEnvelope::decode(r#"{"id":"x","payload":"%%%","metadata":""}"#);
    assert!(matches!(decoded, Err(AppError::Decode(_))));

    let decoded = TaskEnvelope::decode("not json");
    assert!(matches!(decoded, Err(AppError::Decode(_))));
}

#[tokio::test]
async fn subscriber_receives_published_task() {
    let Some(queue) = test_queue() else {
        return;
    };

    let subscription = queue.subscribe(&QueueName::JobProcessing).await;
    assert!(subscription.is_ok());
    let mut subscription = subscription.unwrap_or_else(|_| unreachable!());

    let published = queue
        .add_task(&QueueName::JobProcessing, task("step-run-timed-out"))
        .await;
    assert!(published.is_ok());

    let received = tokio::time::timeout(Duration::from_secs(5), subscription.receiver.recv()).await;
    assert!(matches!(received, Ok(Some(task)) if task.id == "step-run-timed-out"));

    assert!(queue.unsubscribe(&subscription.id).await.is_ok());
    let closed = tokio::time::timeout(Duration::from_secs(5), subscription.receiver.recv()).await;
    assert!(matches!(closed, Ok(None)));
}

#[tokio::test]
async fn idle_subscriber_leaves_surplus_tasks_in_redis() {
    let Some(queue) = test_queue() else {
        return;
    };

    let subscription = queue.subscribe(&QueueName::JobProcessing).await;
    assert!(subscription.is_ok());
    let mut subscription = subscription.unwrap_or_else(|_| unreachable!());

    let surplus = 3;
    for index in 0..SUBSCRIPTION_BUFFER + surplus {
        let published = queue
            .add_task(&QueueName::JobProcessing, task(&format!("task-{index}")))
            .await;
        assert!(published.is_ok());
    }

    let key = queue.key_for(&QueueName::JobProcessing);
    let connection = queue.connection().await;
    assert!(connection.is_ok());
    let mut connection = connection.unwrap_or_else(|_| unreachable!());

    let mut remaining = 0;
    for _ in 0..50 {
        remaining = connection.llen::<_, usize>(&key).await.unwrap_or_default();
        if remaining == surplus {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(remaining, surplus);

    assert!(queue.unsubscribe(&subscription.id).await.is_ok());
    let mut drained = 0;
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_secs(5), subscription.receiver.recv()).await
    {
        drained += 1;
    }
    assert_eq!(drained, SUBSCRIPTION_BUFFER);

    let left = connection.llen::<_, usize>(&key).await.unwrap_or_default();
    assert_eq!(left, surplus);
}
