mod common;

use lendsaga::application::platform::NOTIFY_LOAN_CREATED_QUEUE;
use lendsaga::domain::loan::LoanStatus;
use lendsaga::domain::notification::DeliveryStatus;
use lendsaga::error::LendingError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_failed_notification_is_recorded_and_acked() {
    let harness = common::start().await;
    harness
        .messenger
        .reject_with(Some("carrier rejected".to_string()))
        .await;

    let loan = harness
        .platform
        .loans()
        .apply_loan("U1", dec!(10000), 3, dec!(12))
        .await
        .unwrap();
    harness.platform.wait_idle().await;

    let records = harness
        .platform
        .notifications()
        .notifications_by_borrower("U1")
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Failed);
    assert_eq!(records[0].error_message.as_deref(), Some("carrier rejected"));

    let broker = harness.platform.broker();
    assert!(broker.dead_letters().is_empty());
    assert_eq!(broker.queue_depth(NOTIFY_LOAN_CREATED_QUEUE), 0);

    let stored = harness.platform.loans().get_loan(loan.id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Applied);

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_identity_fails_application() {
    let harness = common::start().await;
    harness.identity.set_unreachable(true);

    let err = harness
        .platform
        .loans()
        .apply_loan("U1", dec!(10000), 3, dec!(12))
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::VerificationFailed(_)));
    // First attempt plus two retries.
    assert_eq!(harness.identity.calls(), 3);
    assert!(harness.platform.loans().loans_by_borrower("U1").await.unwrap().is_empty());

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_gateway_records_nothing() {
    let harness = common::start().await;
    let loan = common::approved_loan(&harness).await;
    harness.gateway.set_unreachable(true);

    let err = harness
        .platform
        .settlement()
        .initiate_payment("U1", loan.id, dec!(8627.42), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::UpstreamUnavailable(_)));
    assert!(err.is_retryable());
    assert!(
        harness
            .platform
            .settlement()
            .payments_by_loan(loan.id)
            .await
            .unwrap()
            .is_empty()
    );

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_events_wait_in_outbox_while_broker_is_down() {
    let harness = common::start().await;
    assert!(harness.platform.health().await.is_healthy());

    harness.platform.broker().shutdown();
    let loan = harness
        .platform
        .loans()
        .apply_loan("U1", dec!(10000), 3, dec!(12))
        .await
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Applied);

    let health = harness.platform.health().await;
    assert!(!health.broker_up);
    assert!(!health.is_healthy());
    assert_eq!(health.outbox_backlog, 1);
    assert_eq!(harness.platform.flush_outboxes().await, 0);

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_health_reports_every_consumer() {
    let harness = common::start().await;
    let health = harness.platform.health().await;
    assert!(health.broker_up);
    assert_eq!(health.workers, 8);
    assert_eq!(health.workers_running, 8);
    assert_eq!(health.outbox_backlog, 0);

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_overdue_sweep_skips_paid_installments() {
    let harness = common::start().await;
    let loan = common::approved_loan(&harness).await;
    let scheduler = harness.platform.scheduler();
    let schedule = scheduler.get_schedule(loan.id).await.unwrap();
    scheduler
        .record_installment_payment(schedule[0].id, chrono::Utc::now())
        .await
        .unwrap();

    let far_future = chrono::Utc::now() + chrono::Duration::days(400);
    let overdue = scheduler.mark_overdue(far_future).await.unwrap();
    assert_eq!(overdue.len(), 5);
    assert!(overdue.iter().all(|i| i.sequence > 1));

    harness.platform.shutdown().await;
}
