use crate::application::consumer::{EventHandlerRef, run_consumer};
use crate::application::loans::LoanService;
use crate::application::notifications::NotificationDispatcher;
use crate::application::rpc::{
    LoanRpc, LoanRpcServer, ResilientIdentityDirectory, ResilientLoanRpc, ResilientPaymentGateway,
    RetryPolicy,
};
use crate::application::scheduler::{
    InstallmentScheduler, LoanApprovedHandler, PaymentCompletedHandler,
};
use crate::application::settlement::SettlementTracker;
use crate::config::PlatformConfig;
use crate::domain::events::{
    LOAN_APPLIED, LOAN_APPROVED, LOAN_CREATED, LOAN_DISBURSED, LOAN_EXCHANGE, LOAN_REJECTED,
    PAYMENT_COMPLETED, PAYMENT_EXCHANGE, PAYMENT_FAILED,
};
use crate::domain::money::InterestRate;
use crate::domain::ports::{
    IdentityDirectoryRef, InstallmentStoreBox, LoanStoreBox, MessageBus, MessageBusRef, MessengerRef,
    NotificationStoreBox, PaymentGatewayRef, PaymentStoreBox,
};
use crate::error::Result;
use crate::infrastructure::broker::InMemoryBroker;
use crate::infrastructure::in_memory::{
    InMemoryInstallmentStore, InMemoryLoanStore, InMemoryNotificationStore, InMemoryPaymentStore,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const EMI_LOAN_APPROVED_QUEUE: &str = "emi-service-loan-approved";
pub const EMI_PAYMENT_COMPLETED_QUEUE: &str = "emi-service-payment-completed";
pub const NOTIFY_LOAN_CREATED_QUEUE: &str = "notification-service-loan-created";
pub const NOTIFY_LOAN_APPROVED_QUEUE: &str = "notification-service-loan-approved";
pub const NOTIFY_LOAN_REJECTED_QUEUE: &str = "notification-service-loan-rejected";
pub const NOTIFY_LOAN_DISBURSED_QUEUE: &str = "notification-service-loan-disbursed";
pub const NOTIFY_PAYMENT_COMPLETED_QUEUE: &str = "notification-service-payment-completed";
pub const NOTIFY_PAYMENT_FAILED_QUEUE: &str = "notification-service-payment-failed";

/// One store per service.
pub struct PlatformStores {
    pub loans: LoanStoreBox,
    pub installments: InstallmentStoreBox,
    pub payments: PaymentStoreBox,
    pub notifications: NotificationStoreBox,
}

impl PlatformStores {
    pub fn in_memory() -> Self {
        Self {
            loans: Box::new(InMemoryLoanStore::new()),
            installments: Box::new(InMemoryInstallmentStore::new()),
            payments: Box::new(InMemoryPaymentStore::new()),
            notifications: Box::new(InMemoryNotificationStore::new()),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb(store: crate::infrastructure::rocksdb::RocksDBStore) -> Self {
        Self {
            loans: Box::new(store.clone()),
            installments: Box::new(store.clone()),
            payments: Box::new(store.clone()),
            notifications: Box::new(store),
        }
    }
}

/// External systems the platform talks to.
pub struct Collaborators {
    pub identity: IdentityDirectoryRef,
    pub gateway: PaymentGatewayRef,
    pub messenger: MessengerRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub broker_up: bool,
    pub workers: usize,
    pub workers_running: usize,
    pub outbox_backlog: usize,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.broker_up && self.workers_running == self.workers
    }
}

/// The four services wired to one broker, with a consumer task per queue.
pub struct LendingPlatform {
    broker: InMemoryBroker,
    loans: Arc<LoanService>,
    scheduler: Arc<InstallmentScheduler>,
    settlement: Arc<SettlementTracker>,
    notifications: Arc<NotificationDispatcher>,
    admin: ResilientLoanRpc,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl LendingPlatform {
    /// Declares the exchanges, binds every queue and starts the consumers.
    ///
    /// Queues exist before this returns, so no event produced afterwards can
    /// be dropped as unroutable.
    pub async fn start(
        config: &PlatformConfig,
        stores: PlatformStores,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let broker = InMemoryBroker::new(config.max_deliveries);
        broker.declare_exchange(LOAN_EXCHANGE).await?;
        broker.declare_exchange(PAYMENT_EXCHANGE).await?;
        let bus: MessageBusRef = Arc::new(broker.clone());

        let policy = RetryPolicy::from_config(config);
        let identity: IdentityDirectoryRef = Arc::new(ResilientIdentityDirectory::new(
            collaborators.identity,
            policy,
        ));
        let gateway: PaymentGatewayRef = Arc::new(ResilientPaymentGateway::new(
            collaborators.gateway,
            policy,
        ));

        let loans = Arc::new(LoanService::new(stores.loans, identity.clone(), bus.clone()));
        let scheduler = Arc::new(InstallmentScheduler::new(
            stores.installments,
            InterestRate::new(config.default_interest_rate)?,
        ));
        let settlement = Arc::new(SettlementTracker::new(
            stores.payments,
            gateway,
            bus.clone(),
            config.currency.clone(),
            config.payment_provider.clone(),
        ));
        let notifications = Arc::new(NotificationDispatcher::new(
            stores.notifications,
            collaborators.messenger,
            identity,
            config.default_phone.clone(),
        ));
        let admin = ResilientLoanRpc::new(Arc::new(LoanRpcServer::new(loans.clone())), policy);

        let schedule_handler: EventHandlerRef =
            Arc::new(LoanApprovedHandler::new(scheduler.clone()));
        let payment_handler: EventHandlerRef =
            Arc::new(PaymentCompletedHandler::new(scheduler.clone()));
        let dispatcher: EventHandlerRef = notifications.clone();
        let routes: Vec<(&str, &str, Vec<&str>, EventHandlerRef)> = vec![
            (
                EMI_LOAN_APPROVED_QUEUE,
                LOAN_EXCHANGE,
                vec![LOAN_APPROVED],
                schedule_handler,
            ),
            (
                EMI_PAYMENT_COMPLETED_QUEUE,
                PAYMENT_EXCHANGE,
                vec![PAYMENT_COMPLETED],
                payment_handler,
            ),
            (
                NOTIFY_LOAN_CREATED_QUEUE,
                LOAN_EXCHANGE,
                vec![LOAN_APPLIED, LOAN_CREATED],
                dispatcher.clone(),
            ),
            (
                NOTIFY_LOAN_APPROVED_QUEUE,
                LOAN_EXCHANGE,
                vec![LOAN_APPROVED],
                dispatcher.clone(),
            ),
            (
                NOTIFY_LOAN_REJECTED_QUEUE,
                LOAN_EXCHANGE,
                vec![LOAN_REJECTED],
                dispatcher.clone(),
            ),
            (
                NOTIFY_LOAN_DISBURSED_QUEUE,
                LOAN_EXCHANGE,
                vec![LOAN_DISBURSED],
                dispatcher.clone(),
            ),
            (
                NOTIFY_PAYMENT_COMPLETED_QUEUE,
                PAYMENT_EXCHANGE,
                vec![PAYMENT_COMPLETED],
                dispatcher.clone(),
            ),
            (
                NOTIFY_PAYMENT_FAILED_QUEUE,
                PAYMENT_EXCHANGE,
                vec![PAYMENT_FAILED],
                dispatcher,
            ),
        ];

        let (shutdown, signal) = watch::channel(false);
        let mut workers = Vec::with_capacity(routes.len());
        for (queue, exchange, patterns, handler) in routes {
            let subscription = broker.bind(queue, exchange, &patterns).await?;
            workers.push(tokio::spawn(run_consumer(
                subscription,
                handler,
                signal.clone(),
            )));
        }
        info!(consumers = workers.len(), "Lending platform started");

        Ok(Self {
            broker,
            loans,
            scheduler,
            settlement,
            notifications,
            admin,
            shutdown,
            workers,
        })
    }

    /// In-memory stores with the given collaborators.
    pub async fn start_in_memory(
        config: &PlatformConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        Self::start(config, PlatformStores::in_memory(), collaborators).await
    }

    pub fn loans(&self) -> &LoanService {
        &self.loans
    }

    pub fn scheduler(&self) -> &InstallmentScheduler {
        &self.scheduler
    }

    pub fn settlement(&self) -> &SettlementTracker {
        &self.settlement
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Administrative RPC entry point, behind the same timeout and retry
    /// policy a remote caller would use.
    pub fn admin(&self) -> &dyn LoanRpc {
        &self.admin
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Waits until every published event has been handled by every consumer.
    pub async fn wait_idle(&self) {
        self.broker.wait_idle().await;
    }

    /// Retries events parked in the services' outboxes.
    pub async fn flush_outboxes(&self) -> usize {
        self.loans.events().flush().await + self.settlement.events().flush().await
    }

    pub async fn health(&self) -> Health {
        Health {
            broker_up: self.broker.is_healthy(),
            workers: self.workers.len(),
            workers_running: self.workers.iter().filter(|w| !w.is_finished()).count(),
            outbox_backlog: self.loans.events().pending().await
                + self.settlement.events().pending().await,
        }
    }

    /// Stops the consumers after their current delivery, then closes the
    /// broker.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Consumer task ended abnormally");
            }
        }
        self.broker.shutdown();
        info!("Lending platform stopped");
    }
}
