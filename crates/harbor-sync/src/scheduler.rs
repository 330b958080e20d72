use crate::accounts::AccountService;
use crate::orchestrator::{SyncOrchestrator, SyncReport};
use crate::SyncError;
use chrono::{DateTime, Duration, Utc};
use harbor_automation::AutomationEvent;
use harbor_core::{EmailAccount, SyncKind, SyncStatus};
use harbor_provider::SubscriptionRequest;
use harbor_storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SNOOZE_BATCH: i64 = 200;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_parallel_accounts: usize,
    /// Push subscriptions expiring within this window are renewed.
    pub renew_before: Duration,
    /// Registration parameters for accounts without a push subscription;
    /// `None` disables push.
    pub push: Option<SubscriptionRequest>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_parallel_accounts: 4,
            renew_before: Duration::hours(24),
            push: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub initial_syncs: usize,
    pub delta_syncs: usize,
    pub skipped: usize,
    pub failed: usize,
    pub snoozes_woken: usize,
    pub subscriptions_renewed: usize,
}

enum AccountRun {
    Initial,
    Delta,
    Skipped,
    Failed,
}

/// Fans sync work out across accounts, one unit of work per account per
/// cycle, bounded by `max_parallel_accounts`.
#[derive(Clone)]
pub struct SyncScheduler {
    storage: Storage,
    orchestrator: SyncOrchestrator,
    accounts: AccountService,
    settings: SchedulerSettings,
}

impl SyncScheduler {
    pub fn new(
        storage: Storage,
        orchestrator: SyncOrchestrator,
        accounts: AccountService,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            accounts,
            settings,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary, SyncError> {
        let accounts = self.storage.list_syncable_accounts().await?;
        let mut summary = self.sync_accounts(accounts).await;

        if self.settings.push.is_some() {
            self.ensure_subscriptions().await;
        }
        summary.snoozes_woken = self.sweep_snoozes(Utc::now()).await?;
        summary.subscriptions_renewed = self.renew_subscriptions(Utc::now()).await?;

        if summary != CycleSummary::default() {
            info!(
                initial = summary.initial_syncs,
                delta = summary.delta_syncs,
                failed = summary.failed,
                snoozes = summary.snoozes_woken,
                renewed = summary.subscriptions_renewed,
                "sync cycle completed"
            );
        }
        Ok(summary)
    }

    /// Syncs every syncable account of one user.
    pub async fn sync_user(&self, user_id: Uuid) -> Result<CycleSummary, SyncError> {
        let accounts = self
            .storage
            .list_active_accounts(user_id)
            .await?
            .into_iter()
            .filter(|account| !matches!(account.sync_status, SyncStatus::Error | SyncStatus::Paused))
            .collect();
        Ok(self.sync_accounts(accounts).await)
    }

    async fn sync_accounts(&self, accounts: Vec<EmailAccount>) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_accounts.max(1)));
        let mut workers = JoinSet::new();

        for account in accounts {
            let orchestrator = self.orchestrator.clone();
            let storage = self.storage.clone();
            let permits = permits.clone();
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                run_account(&storage, &orchestrator, account.id).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(AccountRun::Initial) => summary.initial_syncs += 1,
                Ok(AccountRun::Delta) => summary.delta_syncs += 1,
                Ok(AccountRun::Skipped) => summary.skipped += 1,
                Ok(AccountRun::Failed) => summary.failed += 1,
                Err(err) => {
                    warn!(error = %err, "sync worker join failed");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Dispatches *snooze expired* for every due snooze.
    pub async fn sweep_snoozes(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let due = self.storage.due_snoozes(now, SNOOZE_BATCH).await?;
        let count = due.len();
        for snooze in due {
            self.orchestrator
                .automation()
                .dispatch(AutomationEvent::SnoozeExpired { snooze })
                .await;
        }
        Ok(count)
    }

    pub async fn renew_subscriptions(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let expiring = self
            .storage
            .push_subscriptions_expiring_before(now + self.settings.renew_before)
            .await?;

        let mut renewed = 0;
        for subscription in expiring {
            match self.accounts.renew_subscription(&subscription).await {
                Ok(next) => {
                    renewed += 1;
                    debug!(account_id = %next.account_id, expires_at = %next.expires_at, "push subscription renewed");
                }
                Err(err) => {
                    warn!(account_id = %subscription.account_id, error = %err, "push subscription renewal failed");
                }
            }
        }
        Ok(renewed)
    }

    async fn ensure_subscriptions(&self) {
        let Some(request) = &self.settings.push else {
            return;
        };
        let accounts = match self.storage.list_syncable_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(error = %err, "could not list accounts for push registration");
                return;
            }
        };

        for account in accounts {
            match self.storage.list_push_subscriptions(account.id).await {
                Ok(existing) if existing.is_empty() => {
                    if let Err(err) = self.accounts.subscribe(account.id, request).await {
                        warn!(account_id = %account.id, error = %err, "push registration failed");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(account_id = %account.id, error = %err, "push subscription lookup failed"),
            }
        }
    }
}

/// Initial sync until the messages checkpoint has succeeded once, delta
/// sync afterwards.
async fn run_account(storage: &Storage, orchestrator: &SyncOrchestrator, account_id: Uuid) -> AccountRun {
    let needs_initial = match storage.get_checkpoint(account_id, SyncKind::Messages).await {
        Ok(checkpoint) => checkpoint.and_then(|c| c.last_success_at).is_none(),
        Err(err) => {
            warn!(%account_id, error = %err, "checkpoint lookup failed");
            return AccountRun::Failed;
        }
    };

    let result: Result<SyncReport, SyncError> = if needs_initial {
        orchestrator.initial_sync(account_id).await
    } else {
        orchestrator.delta_sync(account_id).await
    };

    match result {
        Ok(report) if report.skipped => AccountRun::Skipped,
        Ok(_) if needs_initial => AccountRun::Initial,
        Ok(_) => AccountRun::Delta,
        Err(_) => AccountRun::Failed,
    }
}
