use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument, Span};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::models::{ClusterState, JobDefinition, JobExecutionResult, NodeSnapshot};
use scheduler_core::traits::{
    Clock, ClusterListener, ExecutionRecord, JobExecutionStore, JobRepository, ListenerRegistry,
    SchedulerListener, SystemClock,
};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use scheduler_worker::{ExecutionRequest, JobExecutor, PluginRegistry};

use crate::cluster_coordinator::ClusterCoordinator;
use crate::cron_utils::CronExpression;
use crate::job_timer::JobTimers;
use crate::retry_service::{BackoffRetryService, RetryDecision, RetryService};

/// 强制终止后等待插件任务退出的上限
const PLUGIN_TEARDOWN_LIMIT: Duration = Duration::from_secs(1);

/// 任务在本节点上的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Unscheduled,
    Scheduled,
    Executing,
    /// 第 `attempt` 次重试将在 `delay` 后执行
    RetryPending { attempt: u32, delay: Duration },
    /// 本次触发的重试已用尽，任务仍等待下一次 cron 触发
    FailedTerminal,
}

struct JobEntry {
    definition: JobDefinition,
    state: JobState,
    in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeadershipSignal {
    Changed,
    NodeLeft,
}

/// 把集群事件转交给编排器的后台任务，监听器本身不能阻塞
struct LeadershipBridge {
    tx: mpsc::UnboundedSender<LeadershipSignal>,
}

impl ClusterListener for LeadershipBridge {
    fn on_leader_elected(&self, _leader_id: &str) {
        let _ = self.tx.send(LeadershipSignal::Changed);
    }

    fn on_node_joined(&self, _node: &NodeSnapshot) {
        let _ = self.tx.send(LeadershipSignal::Changed);
    }

    fn on_node_left(&self, _node: &NodeSnapshot) {
        let _ = self.tx.send(LeadershipSignal::NodeLeft);
    }
}

struct LeadershipWiring {
    bridge: Arc<dyn ClusterListener>,
    task: JoinHandle<()>,
}

/// 调度编排器
///
/// 持有任务目录，在本节点是 leader（或未启用集群）时按 cron 表达式为每个任务
/// 维护一个定时器，触发后交给 [`JobExecutor`] 执行，并按任务的重试策略处理失败。
/// leader 变化时自动接管或释放全部定时器，任务定义本身不受影响。
pub struct SchedulerOrchestrator {
    node_id: String,
    config: SchedulerConfig,
    registry: Arc<PluginRegistry>,
    executor: Arc<JobExecutor>,
    coordinator: Option<Arc<ClusterCoordinator>>,
    repository: Option<Arc<dyn JobRepository>>,
    execution_store: Option<Arc<dyn JobExecutionStore>>,
    retry_service: Arc<dyn RetryService>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    catalog: RwLock<HashMap<String, JobEntry>>,
    timers: JobTimers,
    executions: Mutex<JoinSet<()>>,
    listeners: ListenerRegistry<dyn SchedulerListener>,
    running: AtomicBool,
    leading: AtomicBool,
    shutdown: watch::Sender<bool>,
    leadership: Mutex<Option<LeadershipWiring>>,
    self_ref: Weak<SchedulerOrchestrator>,
    span: Span,
}

/// [`SchedulerOrchestrator`] 构建器
pub struct SchedulerOrchestratorBuilder {
    node_id: String,
    registry: Arc<PluginRegistry>,
    config: SchedulerConfig,
    coordinator: Option<Arc<ClusterCoordinator>>,
    repository: Option<Arc<dyn JobRepository>>,
    execution_store: Option<Arc<dyn JobExecutionStore>>,
    retry_service: Option<Arc<dyn RetryService>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SchedulerOrchestratorBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<ClusterCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn execution_store(mut self, store: Arc<dyn JobExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    pub fn retry_service(mut self, retry_service: Arc<dyn RetryService>) -> Self {
        self.retry_service = Some(retry_service);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Arc<SchedulerOrchestrator> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = self.metrics.unwrap_or_default();
        let executor = Arc::new(JobExecutor::new(
            self.node_id.clone(),
            Arc::clone(&self.registry),
            self.config.execution_pool_size,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let (shutdown, _) = watch::channel(false);
        let span = tracing::info_span!("scheduler", node.id = %self.node_id);

        Arc::new_cyclic(|self_ref| SchedulerOrchestrator {
            node_id: self.node_id,
            config: self.config,
            registry: self.registry,
            executor,
            coordinator: self.coordinator,
            repository: self.repository,
            execution_store: self.execution_store,
            retry_service: self
                .retry_service
                .unwrap_or_else(|| Arc::new(BackoffRetryService::default())),
            clock,
            metrics,
            catalog: RwLock::new(HashMap::new()),
            timers: JobTimers::new(),
            executions: Mutex::new(JoinSet::new()),
            listeners: ListenerRegistry::new(),
            running: AtomicBool::new(false),
            leading: AtomicBool::new(false),
            shutdown,
            leadership: Mutex::new(None),
            self_ref: self_ref.clone(),
            span,
        })
    }
}

impl SchedulerOrchestrator {
    pub fn builder(
        node_id: impl Into<String>,
        registry: Arc<PluginRegistry>,
    ) -> SchedulerOrchestratorBuilder {
        SchedulerOrchestratorBuilder {
            node_id: node_id.into(),
            registry,
            config: SchedulerConfig::default(),
            coordinator: None,
            repository: None,
            execution_store: None,
            retry_service: None,
            clock: None,
            metrics: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 未启用集群时总是 leader
    pub fn is_leader(&self) -> bool {
        self.coordinator.as_ref().map_or(true, |c| c.is_leader())
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    pub fn add_listener(&self, listener: Arc<dyn SchedulerListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SchedulerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// 启动调度器：加载持久化的任务、接入集群事件，leader 节点立即装载定时器
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            error!(node.id = %self.node_id, "调度器已在运行");
            return Err(SchedulerError::AlreadyRunning);
        }
        self.shutdown.send_replace(false);

        let started = async {
            self.load_persisted_jobs().await;
            self.wire_leadership();
            if self.is_leader() {
                self.take_leadership().await;
            }
            let jobs = self.catalog.read().await.len();
            info!(
                jobs = jobs,
                leader = self.is_leader(),
                "调度器已启动"
            );
        };
        started.instrument(self.span.clone()).await;

        self.listeners.notify(|l| l.on_scheduler_start());
        Ok(())
    }

    /// 停止调度器：取消所有定时器和待重试任务，在宽限期内等待执行中的任务结束
    pub async fn stop(&self) -> SchedulerResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let stopped = async {
            self.unwire_leadership();
            let disarmed = self.timers.disarm_all();
            self.leading.store(false, Ordering::Release);
            self.shutdown.send_replace(true);
            debug!(timers = disarmed, "定时器已取消");

            let mut executions = std::mem::take(
                &mut *self
                    .executions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            let grace = self.config.shutdown_grace_period();
            let drained = tokio::time::timeout(grace, async {
                while executions.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    remaining = executions.len(),
                    grace_secs = grace.as_secs(),
                    "宽限期内任务未结束，强制终止"
                );
                executions.shutdown().await;
            }
            // 被中止的执行会取消插件任务，插件关闭前等它们真正退出
            if !self.executor.wait_for_plugin_tasks(PLUGIN_TEARDOWN_LIMIT).await {
                warn!(
                    remaining = self.executor.plugin_tasks(),
                    "插件任务未能及时退出"
                );
            }

            self.registry.shutdown().await;
            info!("调度器已停止");
        };
        stopped.instrument(self.span.clone()).await;

        self.listeners.notify(|l| l.on_scheduler_stop());
        Ok(())
    }

    /// 调度任务
    ///
    /// 同名任务会被替换。插件必须已注册，cron 表达式必须合法；校验失败时目录和存储均不变。
    pub async fn schedule_job(&self, job: JobDefinition) -> SchedulerResult<()> {
        if !self.registry.contains(job.plugin_name()).await {
            return Err(SchedulerError::UnknownPlugin(job.plugin_name().to_string()));
        }
        let cron = match job.cron_expression() {
            Some(expression) => Some(self.parse_cron(expression)?),
            None => None,
        };

        if let Some(repository) = self.persistence() {
            repository.save_job(&job).await?;
        }

        let count = {
            let mut catalog = self.catalog.write().await;
            catalog.insert(
                job.job_id().to_string(),
                JobEntry {
                    definition: job.clone(),
                    state: JobState::Scheduled,
                    in_flight: 0,
                },
            );
            catalog.len()
        };
        self.metrics.update_scheduled_jobs(count);

        // 替换已有定义时重新装载定时器
        self.timers.disarm(job.job_id());
        let next_fire = match cron {
            Some(cron) if self.should_arm() && job.is_enabled() => {
                self.arm(&job, cron);
                self.timers.next_fire(job.job_id())
            }
            _ => None,
        };

        StructuredLogger::log_job_scheduled(&job, next_fire);
        self.listeners.notify(|l| l.on_job_scheduled(&job));
        if let Some(coordinator) = &self.coordinator {
            coordinator.distribute_job(&job).await;
        }
        Ok(())
    }

    /// 取消任务调度。任务不存在时不做任何事，返回 `false`。
    ///
    /// 已经开始的执行不会被中断，但后续重试不再进行。存储删除失败时目录保持不变。
    pub async fn unschedule_job(&self, job_id: &str) -> SchedulerResult<bool> {
        if let Some(repository) = self.persistence() {
            repository.delete_job(job_id).await?;
        }

        let (removed, count) = {
            let mut catalog = self.catalog.write().await;
            let removed = catalog.remove(job_id);
            (removed, catalog.len())
        };
        self.timers.disarm(job_id);

        let Some(entry) = removed else {
            debug!(job.id = job_id, "任务不存在，忽略取消调度");
            return Ok(false);
        };

        self.metrics.update_scheduled_jobs(count);
        if let Some(coordinator) = &self.coordinator {
            coordinator.forget_job(job_id).await;
        }
        StructuredLogger::log_job_unscheduled(job_id);
        self.listeners
            .notify(|l| l.on_job_unscheduled(&entry.definition));
        Ok(true)
    }

    /// 立即执行一次任务，不经过定时器和 leader 判断，也不重试
    ///
    /// 与定时触发一样遵守重叠执行规则：不能重叠时返回 `Cancelled` 结果，插件不会被调用。
    pub async fn execute_job_now(&self, job_id: &str) -> SchedulerResult<JobExecutionResult> {
        let (job, in_flight, previous) = self
            .catalog
            .read()
            .await
            .get(job_id)
            .map(|e| (e.definition.clone(), e.in_flight, e.state))
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if in_flight > 0 && !self.may_overlap(&job).await {
            warn!(job.id = job_id, in_flight, "上一次执行尚未结束，拒绝立即执行");
            return Ok(JobExecutionResult::cancelled(
                "previous execution still running",
                "scheduler",
            ));
        }

        let result = self.run_attempt(&job, self.clock.now(), 0).await;
        // 只结束本次执行带来的 Executing，待重试和终态保持原样
        if let Some(entry) = self.catalog.write().await.get_mut(job_id) {
            if entry.state == JobState::Executing && entry.in_flight == 0 {
                entry.state = match previous {
                    JobState::RetryPending { .. } | JobState::FailedTerminal => previous,
                    _ => JobState::Scheduled,
                };
            }
        }
        Ok(result)
    }

    /// 按任务 id 排序的目录快照
    pub async fn scheduled_jobs(&self) -> Vec<JobDefinition> {
        let mut jobs: Vec<JobDefinition> = self
            .catalog
            .read()
            .await
            .values()
            .map(|e| e.definition.clone())
            .collect();
        jobs.sort_by(|a, b| a.job_id().cmp(b.job_id()));
        jobs
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobDefinition> {
        self.catalog
            .read()
            .await
            .get(job_id)
            .map(|e| e.definition.clone())
    }

    pub async fn job_state(&self, job_id: &str) -> JobState {
        self.catalog
            .read()
            .await
            .get(job_id)
            .map_or(JobState::Unscheduled, |e| e.state)
    }

    /// 本节点定时器上的下一次触发时间，未装载时为 `None`
    pub fn next_fire_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.timers.next_fire(job_id)
    }

    pub async fn available_plugins(&self) -> Vec<String> {
        self.registry.available_plugins().await
    }

    pub async fn cluster_state(&self) -> ClusterState {
        match &self.coordinator {
            Some(coordinator) => coordinator.cluster_state().await,
            None => ClusterState::single_node(self.node_id.clone()),
        }
    }

    pub async fn execution_history(
        &self,
        job_id: &str,
        limit: usize,
    ) -> SchedulerResult<Vec<ExecutionRecord>> {
        match &self.execution_store {
            Some(store) => store.execution_history(job_id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    fn persistence(&self) -> Option<&Arc<dyn JobRepository>> {
        self.repository
            .as_ref()
            .filter(|_| self.config.persistence_enabled)
    }

    /// 解析表达式并确认在搜索窗口内至少能触发一次
    fn parse_cron(&self, expression: &str) -> SchedulerResult<CronExpression> {
        let cron = CronExpression::parse(expression)?
            .with_search_horizon(self.config.cron_search_horizon_days);
        cron.next_after(self.clock.now())?;
        Ok(cron)
    }

    fn should_arm(&self) -> bool {
        self.is_running() && self.is_leader()
    }

    async fn load_persisted_jobs(&self) {
        let Some(repository) = self.persistence() else {
            return;
        };
        let jobs = match repository.get_all_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!(error = %err, "加载持久化任务失败");
                return;
            }
        };

        let mut loaded = 0;
        for job in jobs {
            if !self.registry.contains(job.plugin_name()).await {
                warn!(job.id = job.job_id(), plugin = job.plugin_name(), "插件未注册，跳过任务");
                continue;
            }
            let mut catalog = self.catalog.write().await;
            if catalog.contains_key(job.job_id()) {
                continue;
            }
            catalog.insert(
                job.job_id().to_string(),
                JobEntry {
                    definition: job,
                    state: JobState::Scheduled,
                    in_flight: 0,
                },
            );
            loaded += 1;
        }
        let count = self.catalog.read().await.len();
        self.metrics.update_scheduled_jobs(count);
        if loaded > 0 {
            info!(loaded, "已加载持久化任务");
        }
    }

    fn wire_leadership(&self) {
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge: Arc<dyn ClusterListener> = Arc::new(LeadershipBridge { tx });
        coordinator.add_listener(Arc::clone(&bridge));

        let weak = self.self_ref.clone();
        let task = tokio::spawn(
            async move {
                while let Some(signal) = rx.recv().await {
                    let Some(this) = weak.upgrade() else {
                        break;
                    };
                    this.on_leadership_signal(signal).await;
                }
            }
            .instrument(self.span.clone()),
        );

        *self
            .leadership
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(LeadershipWiring { bridge, task });
    }

    fn unwire_leadership(&self) {
        let wiring = self
            .leadership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(wiring), Some(coordinator)) = (wiring, &self.coordinator) {
            coordinator.remove_listener(&wiring.bridge);
            wiring.task.abort();
        }
    }

    async fn on_leadership_signal(&self, signal: LeadershipSignal) {
        if !self.is_running() {
            return;
        }
        let leader = self.is_leader();
        let was_leading = self.leading.load(Ordering::Acquire);

        if leader && !was_leading {
            info!("成为 leader，接管任务定时器");
            self.take_leadership().await;
        } else if !leader && was_leading {
            self.leading.store(false, Ordering::Release);
            let disarmed = self.timers.disarm_all();
            info!(timers = disarmed, "失去 leader 身份，释放任务定时器");
        }

        if leader && signal == LeadershipSignal::NodeLeft {
            if let Some(coordinator) = &self.coordinator {
                let moved = coordinator.rebalance_jobs().await;
                debug!(moved = moved.len(), "节点离开后重新分配任务");
            }
        }
    }

    /// 为目录中所有可调度任务装载定时器，已装载的保持不变
    async fn take_leadership(&self) {
        self.leading.store(true, Ordering::Release);
        let jobs: Vec<JobDefinition> = self
            .catalog
            .read()
            .await
            .values()
            .filter(|e| e.definition.is_schedulable())
            .map(|e| e.definition.clone())
            .collect();

        for job in jobs {
            if self.timers.is_armed(job.job_id()) {
                continue;
            }
            let Some(expression) = job.cron_expression() else {
                continue;
            };
            match self.parse_cron(expression) {
                Ok(cron) => self.arm(&job, cron),
                Err(err) => warn!(job.id = job.job_id(), error = %err, "无法装载定时器"),
            }
        }
    }

    fn arm(&self, job: &JobDefinition, cron: CronExpression) {
        let weak = self.self_ref.clone();
        let job_id = job.job_id().to_string();
        let armed = self.timers.arm(
            job.job_id(),
            cron,
            Arc::clone(&self.clock),
            Arc::new(move |scheduled| {
                if let Some(this) = weak.upgrade() {
                    let fired = Arc::clone(&this).fire(job_id.clone(), scheduled);
                    this.spawn_tracked(fired);
                }
            }),
        );
        if armed {
            debug!(job.id = job.job_id(), "定时器已装载");
        }
    }

    fn spawn_tracked(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut executions = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while executions.try_join_next().is_some() {}
        executions.spawn(task.instrument(self.span.clone()));
    }

    async fn fire(self: Arc<Self>, job_id: String, scheduled: DateTime<Utc>) {
        if !self.should_arm() {
            debug!(job.id = %job_id, "非 leader，忽略定时触发");
            return;
        }

        let (job, in_flight) = match self.catalog.read().await.get(&job_id) {
            Some(entry) => (entry.definition.clone(), entry.in_flight),
            None => return,
        };

        if in_flight > 0 {
            if !self.may_overlap(&job).await {
                warn!(job.id = %job_id, in_flight, "上一次执行尚未结束，跳过本次触发");
                self.metrics.record_skipped_fire();
                return;
            }
            warn!(job.id = %job_id, in_flight, "上一次执行尚未结束，本次执行将与其重叠");
        }

        self.run_with_retries(&job, scheduled).await;
    }

    /// 插件支持并行且配置允许时，同一任务的执行可以重叠
    async fn may_overlap(&self, job: &JobDefinition) -> bool {
        self.config.allow_overlapping_executions
            && self.registry.supports_parallel_execution(job.plugin_name()).await
    }

    /// 执行一次触发及其全部重试，重试严格串行
    async fn run_with_retries(&self, job: &JobDefinition, scheduled: DateTime<Utc>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut retries = 0;

        loop {
            let result = self.run_attempt(job, scheduled, retries).await;
            match self.retry_service.decide(job, &result, retries) {
                RetryDecision::Completed => {
                    self.set_state(job.job_id(), JobState::Scheduled).await;
                    return;
                }
                RetryDecision::NotRetryable => {
                    self.fail_terminally(job, &result).await;
                    return;
                }
                RetryDecision::Exhausted { attempts } => {
                    StructuredLogger::log_retries_exhausted(job.job_id(), attempts);
                    self.fail_terminally(job, &result).await;
                    return;
                }
                RetryDecision::Retry { attempt, delay } => {
                    let pending = JobState::RetryPending { attempt, delay };
                    if !self.set_state(job.job_id(), pending).await {
                        debug!(job.id = job.job_id(), "任务已取消调度，停止重试");
                        return;
                    }
                    StructuredLogger::log_retry_scheduled(
                        job.job_id(),
                        attempt,
                        job.max_retries(),
                        delay,
                    );
                    self.metrics.record_retry();
                    self.listeners
                        .notify(|l| l.on_job_retry_scheduled(job, attempt, delay));

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            debug!(job.id = job.job_id(), "调度器停止，放弃待执行的重试");
                            return;
                        }
                    }
                    if !self.catalog.read().await.contains_key(job.job_id()) {
                        debug!(job.id = job.job_id(), "任务已取消调度，停止重试");
                        return;
                    }
                    retries = attempt;
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        job: &JobDefinition,
        scheduled: DateTime<Utc>,
        attempt: u32,
    ) -> JobExecutionResult {
        self.begin_execution(job.job_id()).await;
        self.listeners.notify(|l| l.on_job_executing(job));
        if let Some(coordinator) = &self.coordinator {
            coordinator.job_started();
        }

        let cluster = self.cluster_state().await;
        let request = ExecutionRequest::new(scheduled)
            .attempt(attempt)
            .cluster_view(self.is_leader(), cluster.total_nodes().max(1));
        let result = self.executor.execute(job, request).await;

        if let Some(coordinator) = &self.coordinator {
            coordinator.job_finished();
        }
        self.end_execution(job.job_id()).await;

        if let Some(store) = &self.execution_store {
            if let Err(err) = store
                .save_execution(job.job_id(), &result, self.clock.now())
                .await
            {
                warn!(job.id = job.job_id(), error = %err, "保存执行记录失败");
            }
        }
        self.listeners.notify(|l| l.on_job_executed(job, &result));
        result
    }

    async fn fail_terminally(&self, job: &JobDefinition, result: &JobExecutionResult) {
        self.set_state(job.job_id(), JobState::FailedTerminal).await;
        self.metrics.record_terminal_failure();
        self.listeners
            .notify(|l| l.on_job_failed_terminally(job, result));
    }

    async fn begin_execution(&self, job_id: &str) {
        if let Some(entry) = self.catalog.write().await.get_mut(job_id) {
            entry.in_flight += 1;
            entry.state = JobState::Executing;
        }
    }

    async fn end_execution(&self, job_id: &str) {
        if let Some(entry) = self.catalog.write().await.get_mut(job_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// 返回任务是否仍在目录中
    async fn set_state(&self, job_id: &str, state: JobState) -> bool {
        match self.catalog.write().await.get_mut(job_id) {
            Some(entry) => {
                // 仍有其他执行在进行时保持 Executing
                entry.state = if entry.in_flight > 0 && state == JobState::Scheduled {
                    JobState::Executing
                } else {
                    state
                };
                true
            }
            None => false,
        }
    }
}

impl Drop for SchedulerOrchestrator {
    fn drop(&mut self) {
        if let Some(wiring) = self
            .leadership
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            wiring.task.abort();
        }
    }
}

impl std::fmt::Debug for SchedulerOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerOrchestrator")
            .field("node_id", &self.node_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
