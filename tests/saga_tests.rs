mod common;

use chrono::Months;
use lendsaga::application::settlement::SettlementOutcome;
use lendsaga::domain::installment::InstallmentStatus;
use lendsaga::domain::loan::LoanStatus;
use lendsaga::domain::payment::PaymentStatus;
use lendsaga::error::LendingError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_approval_generates_schedule() {
    let harness = common::start().await;
    let loans = harness.platform.loans();

    let loan = loans.apply_loan("U1", dec!(50000), 6, dec!(12)).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Applied);

    let approved = loans.approve_loan(loan.id).await.unwrap();
    assert_eq!(approved.status, LoanStatus::Approved);
    harness.platform.wait_idle().await;

    let schedule = harness.platform.scheduler().get_schedule(loan.id).await.unwrap();
    assert_eq!(schedule.len(), 6);
    for (index, installment) in schedule.iter().enumerate() {
        let sequence = index as u32 + 1;
        assert_eq!(installment.sequence, sequence);
        assert_eq!(installment.amount.value(), dec!(8627.42));
        assert_eq!(installment.status, InstallmentStatus::Pending);
        assert_eq!(installment.borrower_id, "U1");
        assert_eq!(
            installment.due_date,
            installment
                .created_at
                .checked_add_months(Months::new(sequence))
                .unwrap()
        );
    }

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_borrower_is_notified_along_the_saga() {
    let harness = common::start().await;
    let loan = common::approved_loan(&harness).await;
    harness.platform.loans().disburse_loan(loan.id).await.unwrap();
    harness.platform.wait_idle().await;

    let sent = harness.messenger.sent().await;
    assert_eq!(sent.len(), 3);
    for prefix in [
        "Your loan application for ₹50000 has been received",
        "Congratulations! Your loan of ₹50000 has been approved",
        "Your loan of ₹50000 has been disbursed",
    ] {
        assert!(sent.iter().any(|m| m.body.starts_with(prefix)), "{prefix}");
    }
    assert!(sent.iter().all(|m| m.destination == "+919999999999"));

    let records = harness
        .platform
        .notifications()
        .notifications_by_borrower("U1")
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|n| n.error_message.is_none()));

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_settled_payment_marks_installment_paid() {
    let harness = common::start().await;
    let loan = common::approved_loan(&harness).await;
    let schedule = harness.platform.scheduler().get_schedule(loan.id).await.unwrap();
    let first = &schedule[0];

    let settlement = harness.platform.settlement();
    let intent = settlement
        .initiate_payment("U1", loan.id, first.amount.value(), Some(first.id))
        .await
        .unwrap();
    assert_eq!(intent.payment.status, PaymentStatus::Pending);
    assert!(intent.handle.session_id.starts_with("MOCK_SESS_"));

    let outcome = settlement
        .handle_settlement_callback(intent.order_id(), "SUCCESS", Some("TX1".into()), None)
        .await
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Transitioned(_)));
    harness.platform.wait_idle().await;

    let installment = harness.platform.scheduler().get_installment(first.id).await.unwrap();
    assert_eq!(installment.status, InstallmentStatus::Paid);
    assert!(installment.payment_date.is_some());

    let sent = harness.messenger.sent().await;
    assert!(sent.iter().any(|m| m.body.starts_with("Payment of ₹8627.42 successful")));

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_failed_payment_leaves_installment_pending() {
    let harness = common::start().await;
    let loan = common::approved_loan(&harness).await;
    let schedule = harness.platform.scheduler().get_schedule(loan.id).await.unwrap();

    let settlement = harness.platform.settlement();
    let intent = settlement
        .initiate_payment("U1", loan.id, dec!(8627.42), Some(schedule[0].id))
        .await
        .unwrap();
    settlement
        .handle_settlement_callback(intent.order_id(), "FAILED", None, None)
        .await
        .unwrap();
    harness.platform.wait_idle().await;

    let payment = settlement.get_payment_by_order(intent.order_id()).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let installment = harness
        .platform
        .scheduler()
        .get_installment(schedule[0].id)
        .await
        .unwrap();
    assert_eq!(installment.status, InstallmentStatus::Pending);

    let sent = harness.messenger.sent().await;
    assert!(sent.iter().any(|m| m.body.contains("failed: Gateway reported FAILED")));

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_rejected_loan_gets_no_schedule() {
    let harness = common::start().await;
    let loans = harness.platform.loans();
    let loan = loans.apply_loan("U2", dec!(20000), 12, dec!(10)).await.unwrap();

    let rejected = loans.reject_loan(loan.id, "Insufficient income").await.unwrap();
    assert_eq!(rejected.status, LoanStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Insufficient income"));
    harness.platform.wait_idle().await;

    assert!(harness.platform.scheduler().get_schedule(loan.id).await.unwrap().is_empty());
    let sent = harness.messenger.sent().await;
    assert!(sent.iter().any(|m| m.body.ends_with("Reason: Insufficient income")));

    let err = loans.approve_loan(loan.id).await.unwrap_err();
    assert!(matches!(err, LendingError::InvalidStateTransition { .. }));

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_unverified_borrower_cannot_apply() {
    let harness = common::start().await;
    harness.identity.mark_unverified("U3").await;

    let err = harness
        .platform
        .loans()
        .apply_loan("U3", dec!(10000), 3, dec!(12))
        .await
        .unwrap_err();
    assert!(matches!(err, LendingError::VerificationFailed(_)));
    assert!(harness.platform.loans().loans_by_borrower("U3").await.unwrap().is_empty());

    harness.platform.wait_idle().await;
    assert!(harness.messenger.sent().await.is_empty());

    harness.platform.shutdown().await;
}

#[tokio::test]
async fn test_invalid_application_is_rejected_before_verification() {
    let harness = common::start().await;
    let loans = harness.platform.loans();

    assert!(matches!(
        loans.apply_loan("U1", dec!(0), 6, dec!(12)).await,
        Err(LendingError::ValidationError(_))
    ));
    assert!(matches!(
        loans.apply_loan("U1", dec!(1000), 0, dec!(12)).await,
        Err(LendingError::ValidationError(_))
    ));
    assert_eq!(harness.identity.calls(), 0);

    harness.platform.shutdown().await;
}
