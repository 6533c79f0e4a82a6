//! 保留策略调度
//!
//! 子资源写入时按父资源的保留模式计算过期时间；周期任务以有界批次清理过期数据。

use crate::{
    clock::Clock,
    config::RetentionConfig,
    error::Result,
    models::{
        policy::Action,
        principal::Principal,
        resource::{Resource, ResourceAttrs, ResourceClass, ResourceRef},
        retention::{Expiry, SweepReport},
    },
    repository::{OAuthStateStore, ResourceStore},
    retry::RetryPolicy,
    services::{audit_recorder::AuditRecorder, policy_engine::PolicyEngine},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct RetentionScheduler {
    resources: Arc<dyn ResourceStore>,
    states: Arc<dyn OAuthStateStore>,
    audit: Arc<AuditRecorder>,
    policy: Arc<PolicyEngine>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    config: RetentionConfig,
    service: Principal,
}

impl RetentionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        states: Arc<dyn OAuthStateStore>,
        audit: Arc<AuditRecorder>,
        policy: Arc<PolicyEngine>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        config: RetentionConfig,
        service: Principal,
    ) -> Self {
        Self {
            resources,
            states,
            audit,
            policy,
            clock,
            retry,
            config,
            service,
        }
    }

    /// 按父资源当前的保留模式计算新子资源的过期时间
    ///
    /// 父资源改模式不会回写已有子资源。
    pub fn compute_expiry(&self, parent: &Resource) -> Expiry {
        match parent.retention_mode {
            Some(mode) => mode.expiry_from(self.clock.now()),
            None => Expiry::Never,
        }
    }

    /// 执行一次清理，返回删除总数
    pub async fn run_sweep(&self) -> Result<u64> {
        Ok(self.run_sweep_report().await?.total())
    }

    /// 执行一次清理，按类别返回删除数
    pub async fn run_sweep_report(&self) -> Result<SweepReport> {
        self.sweep(None).await
    }

    /// 启动周期清理任务，收到关闭信号后在当前批次结束时退出
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let stop = shutdown.clone();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = interval.as_secs(), "Retention sweeper started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Some(&stop)).await {
                            tracing::error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }

            tracing::info!("Retention sweeper stopped");
        })
    }

    async fn sweep(&self, stop: Option<&watch::Receiver<bool>>) -> Result<SweepReport> {
        // 清理以内部服务身份授权
        let target = ResourceAttrs::draft(ResourceClass::Message, None, None);
        self.policy
            .require(&self.service, Action::Delete, &ResourceRef::Loaded(target))
            .await?;

        let now = self.clock.now();
        let batch = self.config.batch_size.max(1);
        let stopped = || stop.is_some_and(|rx| *rx.borrow());
        let mut report = SweepReport::default();

        loop {
            let resources = &self.resources;
            let deleted = self
                .retry
                .run("retention.delete_expired", move || async move {
                    resources.delete_expired(now, batch).await
                })
                .await?;
            report.resources += deleted;
            if deleted < u64::from(batch) || stopped() {
                break;
            }
        }

        loop {
            let states = &self.states;
            let deleted = self
                .retry
                .run("retention.delete_stale_states", move || async move {
                    states.delete_stale_states(now, batch).await
                })
                .await?;
            report.oauth_states += deleted;
            if deleted < u64::from(batch) || stopped() {
                break;
            }
        }

        if let Some(days) = self.config.audit_retention_days {
            let cutoff = now - chrono::Duration::days(i64::from(days));
            loop {
                let purged = self.audit.purge_before(&self.service, cutoff, batch).await?;
                report.audit_entries += purged;
                if purged < u64::from(batch) || stopped() {
                    break;
                }
            }
        }

        metrics::counter!("retention.purged", "kind" => "resource").increment(report.resources);
        metrics::counter!("retention.purged", "kind" => "oauth_state").increment(report.oauth_states);
        metrics::counter!("retention.purged", "kind" => "audit_entry").increment(report.audit_entries);

        tracing::info!(
            resources = report.resources,
            oauth_states = report.oauth_states,
            audit_entries = report.audit_entries,
            "Retention sweep completed"
        );

        Ok(report)
    }
}
