pub mod cluster_coordinator;
pub mod cron_utils;
pub mod heartbeat;
pub mod job_distributor;
pub mod job_timer;
pub mod leader_election;
pub mod node_failure_detector;
pub mod retry_service;
pub mod scheduler;
pub mod strategies;

pub use cluster_coordinator::ClusterCoordinator;
pub use cron_utils::{next_fire_time, CronExpression};
pub use heartbeat::{HeartbeatManager, LoadProbe};
pub use job_distributor::{JobAssignment, JobDistributor};
pub use job_timer::JobTimers;
pub use leader_election::{LeaderElection, LeadershipChange};
pub use node_failure_detector::{LivenessPolicy, NodeFailureDetector, StatusTransition};
pub use retry_service::{BackoffRetryService, RetryConfig, RetryDecision, RetryService};
pub use scheduler::{JobState, SchedulerOrchestrator, SchedulerOrchestratorBuilder};
pub use strategies::{create_strategy, DistributionStrategy};
