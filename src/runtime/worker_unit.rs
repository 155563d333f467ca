// src/runtime/worker_unit.rs
//! One worker slot's job lifecycle
//!
//! A [`WorkerUnit`] registers with the control plane, listens on its queue
//! subscription and handles one job at a time:
//!
//! 1. mark the job in flight
//! 2. fetch the job spec
//! 3. start the job container and resolve its address
//! 4. call the container endpoint (POST with input, bare GET without)
//! 5. report the outcome
//! 6. acknowledge the message, strictly after the report
//!
//! Errors from any step escape the subscription and end the worker: the
//! in-flight job is reported failed and the process exits abnormally. An
//! interrupt reports the in-flight job the same way but exits as
//! user-stopped.

use crate::container::{
    ContainerDispatcher, ContainerRuntime, DockerRuntime, JobResult, WorkerCredentials,
};
use crate::control_plane::{ControlPlane, JobSpec, WorkerIdentity};
use crate::queue::{JobHandler, JobMessage, PullSubscription, QueueSubscription};
use crate::runtime::state::{StateCell, WorkerState};
use crate::store::{ConfigStore, StoreFormat};
use crate::utils::config::FleetConfig;
use crate::utils::errors::{Result, WorkerError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Exit code of a worker stopped by signal
pub const EXIT_USER_STOPPED: u8 = 0;

/// Exit code of a worker that hit an unrecoverable error
pub const EXIT_ABNORMAL: u8 = 127;

/// How a worker's run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    UserStopped,
    AbnormalError,
}

impl WorkerExit {
    pub fn code(&self) -> u8 {
        match self {
            WorkerExit::UserStopped => EXIT_USER_STOPPED,
            WorkerExit::AbnormalError => EXIT_ABNORMAL,
        }
    }
}

/// Pause before re-registering after a subscription session ends cleanly
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Identity and credentials ready for one slot
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub slot: usize,
    pub identity: WorkerIdentity,
    pub credentials: WorkerCredentials,
}

fn identity_key(slot: usize) -> String {
    format!("worker_conf-{}", slot)
}

fn credentials_key(slot: usize) -> String {
    format!("credentials-{}/config", slot)
}

/// Handles delivered messages; shared with the subscription
struct JobProcessor {
    worker_id: String,
    control_plane: Arc<dyn ControlPlane>,
    runtime: Mutex<Box<dyn ContainerRuntime>>,
    dispatcher: ContainerDispatcher,
    state: StateCell,
}

impl JobProcessor {
    async fn execute(&self, job_id: &str, spec: &JobSpec) -> Result<JobResult> {
        let mut runtime = self.runtime.lock().await;
        runtime.set_image_info(spec.image.clone());
        runtime.run().await?;

        let outcome = async {
            let address = runtime.address().await?;
            self.dispatcher
                .dispatch(job_id, address, spec.input_data())
                .await
        }
        .await;

        if let Err(e) = runtime.stop().await {
            warn!(job_id, "Failed to stop job container: {}", e);
        }

        outcome
    }
}

#[async_trait]
impl JobHandler for JobProcessor {
    async fn handle(&self, message: JobMessage) -> Result<()> {
        let job_id = message.job_id().to_string();
        info!(job_id = %job_id, "Starting job");
        self.state.set(WorkerState::processing(&job_id));

        let spec = self
            .control_plane
            .initiate_job(&self.worker_id, &job_id)
            .await?;
        let result = self.execute(&job_id, &spec).await?;

        self.control_plane
            .complete_job(&self.worker_id, &result.job_id, Some(&result.body), !result.succeeded)
            .await?;
        self.state.set(WorkerState::Acknowledging {
            job_id: job_id.clone(),
        });
        let outcome = if result.succeeded { "succeeded" } else { "failed" };
        metrics::counter!("fleet_jobs_total", "outcome" => outcome).increment(1);

        message.ack().await?;
        self.state.set(WorkerState::Listening);

        info!(job_id = %job_id, succeeded = result.succeeded, "Job finished");
        Ok(())
    }
}

/// Runs one worker slot
pub struct WorkerUnit {
    slot: usize,
    worker_id: String,
    control_plane: Arc<dyn ControlPlane>,
    subscription: Arc<dyn QueueSubscription>,
    processor: Arc<JobProcessor>,
    state: StateCell,
    heartbeat_interval: Option<Duration>,
    resubscribe_delay: Duration,
}

impl WorkerUnit {
    /// Load the slot's identity, creating and saving one if none exists,
    /// and write its credentials to a slot-private directory.
    pub async fn provision(
        slot: usize,
        store: &ConfigStore,
        control_plane: &dyn ControlPlane,
    ) -> Result<Provisioned> {
        let key = identity_key(slot);

        let identity = match store.load_as::<WorkerIdentity>(&key)? {
            Some(identity) => {
                debug!(slot, worker_id = %identity.worker_id, "Loaded identity");
                identity
            }
            None => {
                info!(slot, "No identity on file, requesting one");
                let identity = control_plane.create_worker().await.map_err(|e| {
                    WorkerError::IdentityProvisioning {
                        slot,
                        reason: e.to_string(),
                    }
                })?;
                store.save(&key, &identity, StoreFormat::Json)?;
                identity
            }
        };

        let path = store.save(&credentials_key(slot), &identity.credentials, StoreFormat::Json)?;
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| WorkerError::Store(format!("No parent directory for {:?}", path)))?;

        Ok(Provisioned {
            slot,
            identity,
            credentials: WorkerCredentials { dir },
        })
    }

    /// Assemble a worker from its collaborators
    pub fn new(
        provisioned: Provisioned,
        control_plane: Arc<dyn ControlPlane>,
        runtime: Box<dyn ContainerRuntime>,
        dispatcher: ContainerDispatcher,
        subscription: Arc<dyn QueueSubscription>,
    ) -> Self {
        let state = StateCell::new();
        let worker_id = provisioned.identity.worker_id;

        let processor = Arc::new(JobProcessor {
            worker_id: worker_id.clone(),
            control_plane: Arc::clone(&control_plane),
            runtime: Mutex::new(runtime),
            dispatcher,
            state: state.clone(),
        });

        Self {
            slot: provisioned.slot,
            worker_id,
            control_plane,
            subscription,
            processor,
            state,
            heartbeat_interval: None,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Provision the slot and wire up the docker runtime and pull subscription
    pub async fn from_config(
        slot: usize,
        config: &FleetConfig,
        store: &ConfigStore,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Result<Self> {
        let provisioned = Self::provision(slot, store, control_plane.as_ref()).await?;

        let runtime = DockerRuntime::new(
            config.container.docker_binary.clone(),
            Some(provisioned.credentials.clone()),
        );
        let dispatcher = ContainerDispatcher::new(
            config.container.port,
            config.container.dispatch_timeout_secs.map(Duration::from_secs),
        );
        let subscription = PullSubscription::new(
            &config.queue.broker_url,
            provisioned.identity.subscription_name.clone(),
            &provisioned.identity.subscription_token,
            Some(&provisioned.credentials),
            Duration::from_millis(config.queue.poll_interval_ms),
        )?;

        let heartbeat = match config.worker.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self::new(
            provisioned,
            control_plane,
            Box::new(runtime),
            dispatcher,
            Arc::new(subscription),
        )
        .with_heartbeat(heartbeat)
        .with_resubscribe_delay(Duration::from_millis(config.queue.poll_interval_ms)))
    }

    /// Set up slot `slot` and run it until `shutdown` fires.
    ///
    /// A slot that cannot be set up exits the same way as one that fails
    /// while running.
    pub async fn run_slot(
        slot: usize,
        config: &FleetConfig,
        store: &ConfigStore,
        control_plane: Arc<dyn ControlPlane>,
        shutdown: CancellationToken,
    ) -> WorkerExit {
        match Self::from_config(slot, config, store, control_plane).await {
            Ok(unit) => unit.run(shutdown).await,
            Err(e) => {
                error!(slot, "Worker setup failed: {}", e);
                WorkerExit::AbnormalError
            }
        }
    }

    /// Re-register periodically while listening
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Wait this long before starting a new session after one ends cleanly
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Run until `shutdown` fires or an unrecoverable error occurs
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerExit {
        let span = info_span!("worker", slot = self.slot, worker_id = %self.worker_id);

        async move {
            info!("Starting worker loop");

            loop {
                let outcome = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    result = self.session() => Some(result),
                };

                match outcome {
                    None => {
                        info!("Worker stopped by user");
                        self.report_in_flight_failure().await;
                        self.release_container().await;
                        return WorkerExit::UserStopped;
                    }
                    Some(Ok(())) => {
                        debug!(
                            delay_ms = self.resubscribe_delay.as_millis() as u64,
                            "Subscription session ended, re-registering"
                        );
                        // cancellation is picked up at the top of the loop
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = tokio::time::sleep(self.resubscribe_delay) => {}
                        }
                    }
                    Some(Err(e)) => {
                        self.report_in_flight_failure().await;
                        self.release_container().await;
                        error!("Worker error: {}", e);
                        return WorkerExit::AbnormalError;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Register, then listen until the subscription session ends
    async fn session(&self) -> Result<()> {
        self.state.set(WorkerState::Registering);
        self.control_plane.register_worker(&self.worker_id).await?;
        metrics::counter!("fleet_registrations_total").increment(1);

        self.state.set(WorkerState::Listening);
        let handler: Arc<dyn JobHandler> = Arc::clone(&self.processor) as Arc<dyn JobHandler>;
        let listen = self.subscription.listen(handler);

        match self.heartbeat_interval {
            Some(period) => {
                tokio::select! {
                    result = listen => result,
                    _ = self.heartbeat(period) => Ok(()),
                }
            }
            None => listen.await,
        }
    }

    async fn heartbeat(&self, period: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;
            match self.control_plane.register_worker(&self.worker_id).await {
                Ok(()) => {
                    debug!("Heartbeat registered");
                    metrics::counter!("fleet_registrations_total").increment(1);
                }
                Err(e) => warn!("Heartbeat registration failed: {}", e),
            }
        }
    }

    /// Remove a job container left behind by an abandoned job
    async fn release_container(&self) {
        let mut runtime = self.processor.runtime.lock().await;
        if let Err(e) = runtime.stop().await {
            warn!("Failed to remove job container: {}", e);
        }
    }

    /// Report the in-flight job, if any, as failed
    async fn report_in_flight_failure(&self) {
        let Some(job_id) = self.state.take_in_flight() else {
            return;
        };

        warn!(job_id = %job_id, "Reporting interrupted job as failed");
        metrics::counter!("fleet_job_failures_reported_total").increment(1);

        if let Err(e) = self
            .control_plane
            .complete_job(&self.worker_id, &job_id, None, true)
            .await
        {
            error!(job_id = %job_id, "Failed to report job failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ImageDescriptor;
    use crate::queue::InMemorySubscription;
    use crate::utils::http::test_server;
    use hyper::StatusCode;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<SyncMutex<Vec<String>>>;

    #[derive(Default)]
    struct MockControlPlane {
        log: Log,
        specs: SyncMutex<HashMap<String, JobSpec>>,
        creates: AtomicUsize,
        fail_register: bool,
        fail_complete: bool,
    }

    impl MockControlPlane {
        fn with_log(log: Log) -> Self {
            Self {
                log,
                ..Default::default()
            }
        }

        fn add_job(&self, job_id: &str, input: Option<serde_json::Value>) {
            self.specs.lock().insert(
                job_id.to_string(),
                JobSpec {
                    image: ImageDescriptor::new("job-image:1"),
                    input,
                },
            );
        }

        fn completions(&self) -> Vec<String> {
            self.log
                .lock()
                .iter()
                .filter(|e| e.starts_with("complete:"))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl ControlPlane for MockControlPlane {
        async fn create_worker(&self) -> Result<WorkerIdentity> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerIdentity {
                worker_id: format!("w-{}", n),
                subscription_name: format!("sub-{}", n),
                subscription_token: "token".into(),
                credentials: json!({"auths": {}}),
            })
        }

        async fn register_worker(&self, worker_id: &str) -> Result<()> {
            if self.fail_register {
                return Err(WorkerError::ControlPlaneTransport("refused".into()));
            }
            self.log.lock().push(format!("register:{}", worker_id));
            Ok(())
        }

        async fn initiate_job(&self, _worker_id: &str, job_id: &str) -> Result<JobSpec> {
            self.log.lock().push(format!("initiate:{}", job_id));
            self.specs
                .lock()
                .get(job_id)
                .cloned()
                .ok_or_else(|| WorkerError::ControlPlane {
                    endpoint: format!("/jobs/{}/initiate", job_id),
                    status: 404,
                    body: "unknown job".into(),
                })
        }

        async fn complete_job(
            &self,
            _worker_id: &str,
            job_id: &str,
            data: Option<&[u8]>,
            fail: bool,
        ) -> Result<()> {
            let data = data.map(|d| String::from_utf8_lossy(d).into_owned());
            self.log
                .lock()
                .push(format!("complete:{}:fail={}:data={:?}", job_id, fail, data));
            if self.fail_complete {
                return Err(WorkerError::ControlPlane {
                    endpoint: format!("/jobs/{}/complete", job_id),
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum RunBehaviour {
        Start,
        Fail,
        /// Container starts but never reports an address
        StallAfterStart,
    }

    struct MockRuntime {
        log: Log,
        behaviour: RunBehaviour,
        address: IpAddr,
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        fn set_image_info(&mut self, image: ImageDescriptor) {
            self.log.lock().push(format!("image:{}", image.image));
        }

        async fn run(&mut self) -> Result<()> {
            self.log.lock().push("run".into());
            match self.behaviour {
                RunBehaviour::Fail => Err(WorkerError::Container("image pull failed".into())),
                _ => Ok(()),
            }
        }

        async fn address(&self) -> Result<IpAddr> {
            if self.behaviour == RunBehaviour::StallAfterStart {
                self.log.lock().push("address".into());
                return std::future::pending().await;
            }
            Ok(self.address)
        }

        async fn stop(&mut self) -> Result<()> {
            self.log.lock().push("stop".into());
            Ok(())
        }
    }

    struct LoggingAck {
        log: Log,
        job_id: String,
        fail: bool,
    }

    #[async_trait]
    impl crate::queue::Acknowledger for LoggingAck {
        async fn ack(&self) -> Result<()> {
            self.log.lock().push(format!("ack:{}", self.job_id));
            if self.fail {
                return Err(WorkerError::Acknowledge {
                    job_id: self.job_id.clone(),
                    reason: "ack deadline expired".into(),
                });
            }
            Ok(())
        }
    }

    /// Delivers a fixed list of jobs, then keeps the session open
    struct ScriptedSubscription {
        log: Log,
        pending: SyncMutex<Vec<String>>,
        fail_ack: bool,
    }

    #[async_trait]
    impl QueueSubscription for ScriptedSubscription {
        async fn listen(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
            let jobs: Vec<String> = self.pending.lock().drain(..).collect();
            for job_id in jobs {
                let ack = LoggingAck {
                    log: Arc::clone(&self.log),
                    job_id: job_id.clone(),
                    fail: self.fail_ack,
                };
                handler
                    .handle(JobMessage::new(job_id, json!(null), Box::new(ack)))
                    .await?;
            }
            std::future::pending().await
        }
    }

    struct Harness {
        log: Log,
        control_plane: Arc<MockControlPlane>,
        unit: Arc<WorkerUnit>,
    }

    fn harness(jobs: &[&str], behaviour: RunBehaviour, container_port: u16) -> Harness {
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane::with_log(Arc::clone(&log)));
        harness_with(log, control_plane, jobs, behaviour, container_port)
    }

    fn harness_with(
        log: Log,
        control_plane: Arc<MockControlPlane>,
        jobs: &[&str],
        behaviour: RunBehaviour,
        container_port: u16,
    ) -> Harness {
        let subscription = ScriptedSubscription {
            log: Arc::clone(&log),
            pending: SyncMutex::new(jobs.iter().map(|j| j.to_string()).collect()),
            fail_ack: false,
        };
        harness_on(log, control_plane, Arc::new(subscription), behaviour, container_port)
    }

    fn harness_on(
        log: Log,
        control_plane: Arc<MockControlPlane>,
        subscription: Arc<dyn QueueSubscription>,
        behaviour: RunBehaviour,
        container_port: u16,
    ) -> Harness {
        let provisioned = Provisioned {
            slot: 0,
            identity: WorkerIdentity {
                worker_id: "w-0".into(),
                subscription_name: "sub-0".into(),
                subscription_token: "token".into(),
                credentials: json!({}),
            },
            credentials: WorkerCredentials {
                dir: std::env::temp_dir(),
            },
        };
        let runtime = MockRuntime {
            log: Arc::clone(&log),
            behaviour,
            address: "127.0.0.1".parse().unwrap(),
        };

        let unit = WorkerUnit::new(
            provisioned,
            control_plane.clone(),
            Box::new(runtime),
            ContainerDispatcher::new(container_port, None),
            subscription,
        );

        Harness {
            log,
            control_plane,
            unit: Arc::new(unit),
        }
    }

    async fn wait_for(log: &Log, entry: &str) {
        for _ in 0..500 {
            if log.lock().iter().any(|e| e == entry) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {:?}, log: {:?}", entry, log.lock());
    }

    fn position(log: &Log, prefix: &str) -> usize {
        log.lock()
            .iter()
            .position(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("{} missing from {:?}", prefix, log.lock()))
    }

    #[tokio::test]
    async fn input_job_posts_body_reports_success_then_acks() {
        let container = test_server::spawn(|_| (StatusCode::OK, "prediction".to_string())).await;
        let h = harness(&["J1"], RunBehaviour::Start, container.addr.port());
        h.control_plane.add_job("J1", Some(json!({"text": "hello"})));

        let shutdown = CancellationToken::new();
        let unit = Arc::clone(&h.unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { unit.run(token).await });

        wait_for(&h.log, "ack:J1").await;
        assert_eq!(h.unit.state(), WorkerState::Listening);
        shutdown.cancel();
        assert_eq!(task.await.unwrap(), WorkerExit::UserStopped);

        assert_eq!(
            h.control_plane.completions(),
            vec![r#"complete:J1:fail=false:data=Some("prediction")"#.to_string()]
        );
        assert!(position(&h.log, "complete:J1") < position(&h.log, "ack:J1"));
        assert_eq!(h.log.lock().iter().filter(|e| *e == "ack:J1").count(), 1);

        let req = &container.recorded()[0];
        assert_eq!(req.method, "POST");
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body, json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn job_without_input_probes_and_reports_status() {
        let container = test_server::spawn(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "crashed".to_string())
        })
        .await;
        let h = harness(&["J2"], RunBehaviour::Start, container.addr.port());
        h.control_plane.add_job("J2", None);

        let shutdown = CancellationToken::new();
        let unit = Arc::clone(&h.unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { unit.run(token).await });

        wait_for(&h.log, "ack:J2").await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(
            h.control_plane.completions(),
            vec![r#"complete:J2:fail=true:data=Some("crashed")"#.to_string()]
        );
        let req = &container.recorded()[0];
        assert_eq!(req.method, "GET");
        assert!(req.body.is_empty());
        // container is torn down before the report
        assert!(position(&h.log, "stop") < position(&h.log, "complete:J2"));
    }

    #[tokio::test]
    async fn container_failure_reports_job_failed_without_ack() {
        let h = harness(&["J4"], RunBehaviour::Fail, 1);
        h.control_plane.add_job("J4", Some(json!({"x": 1})));

        let exit = h.unit.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::AbnormalError);
        assert_eq!(exit.code(), EXIT_ABNORMAL);
        assert_eq!(
            h.control_plane.completions(),
            vec!["complete:J4:fail=true:data=None".to_string()]
        );
        assert!(!h.log.lock().iter().any(|e| e.starts_with("ack:")));
    }

    #[tokio::test]
    async fn initiate_failure_reports_failed_and_starts_no_container() {
        // J5 is never added, so initiate_job fails
        let h = harness(&["J5"], RunBehaviour::Start, 1);

        let exit = h.unit.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::AbnormalError);
        assert_eq!(
            h.control_plane.completions(),
            vec!["complete:J5:fail=true:data=None".to_string()]
        );
        assert!(!h.log.lock().iter().any(|e| e == "run"));
        assert!(!h.log.lock().iter().any(|e| e.starts_with("ack:")));
    }

    #[tokio::test]
    async fn interrupt_mid_job_reports_once_and_exits_user_stopped() {
        let h = harness(&["J3"], RunBehaviour::StallAfterStart, 1);
        h.control_plane.add_job("J3", Some(json!({"x": 1})));

        let shutdown = CancellationToken::new();
        let unit = Arc::clone(&h.unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { unit.run(token).await });

        wait_for(&h.log, "address").await;
        assert_eq!(h.unit.state().in_flight_job(), Some("J3"));
        assert!(!h.log.lock().iter().any(|e| e == "stop"));
        shutdown.cancel();

        let exit = task.await.unwrap();
        assert_eq!(exit, WorkerExit::UserStopped);
        assert_eq!(exit.code(), EXIT_USER_STOPPED);
        assert_eq!(
            h.control_plane.completions(),
            vec!["complete:J3:fail=true:data=None".to_string()]
        );
        assert!(!h.log.lock().iter().any(|e| e.starts_with("ack:")));
        // the started container is removed after the failure report
        assert!(position(&h.log, "complete:J3") < position(&h.log, "stop"));
    }

    #[tokio::test]
    async fn ack_failure_after_report_is_abnormal_without_second_report() {
        let container = test_server::spawn(|_| (StatusCode::OK, "done".to_string())).await;
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane::with_log(Arc::clone(&log)));
        control_plane.add_job("JA", Some(json!({"x": 1})));
        let subscription = ScriptedSubscription {
            log: Arc::clone(&log),
            pending: SyncMutex::new(vec!["JA".to_string()]),
            fail_ack: true,
        };
        let h = harness_on(
            log,
            control_plane,
            Arc::new(subscription),
            RunBehaviour::Start,
            container.addr.port(),
        );

        let exit = h.unit.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::AbnormalError);
        assert_eq!(exit.code(), EXIT_ABNORMAL);
        assert_eq!(
            h.control_plane.completions(),
            vec![r#"complete:JA:fail=false:data=Some("done")"#.to_string()]
        );
        assert!(position(&h.log, "complete:JA") < position(&h.log, "ack:JA"));
    }

    #[tokio::test]
    async fn failed_completion_is_re_reported_as_failure() {
        let container = test_server::spawn(|_| (StatusCode::OK, "done".to_string())).await;
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane {
            log: Arc::clone(&log),
            fail_complete: true,
            ..Default::default()
        });
        control_plane.add_job("JC", Some(json!({"x": 1})));
        let h = harness_with(log, control_plane, &["JC"], RunBehaviour::Start, container.addr.port());

        let exit = h.unit.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::AbnormalError);
        assert_eq!(
            h.control_plane.completions(),
            vec![
                r#"complete:JC:fail=false:data=Some("done")"#.to_string(),
                "complete:JC:fail=true:data=None".to_string(),
            ]
        );
        assert!(!h.log.lock().iter().any(|e| e.starts_with("ack:")));
    }

    #[tokio::test]
    async fn in_memory_queue_drives_a_job_end_to_end() {
        let container = test_server::spawn(|_| (StatusCode::OK, "ok".to_string())).await;
        let (subscription, publisher) = InMemorySubscription::new();
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane::with_log(Arc::clone(&log)));
        control_plane.add_job("J7", Some(json!({"text": "hi"})));
        let h = harness_on(
            log,
            control_plane,
            Arc::new(subscription),
            RunBehaviour::Start,
            container.addr.port(),
        );

        let shutdown = CancellationToken::new();
        let unit = Arc::clone(&h.unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { unit.run(token).await });

        publisher.publish("J7").unwrap();
        for _ in 0..500 {
            if !publisher.acked().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();

        assert_eq!(task.await.unwrap(), WorkerExit::UserStopped);
        assert_eq!(publisher.acked(), vec!["J7".to_string()]);
        assert_eq!(
            h.control_plane.completions(),
            vec![r#"complete:J7:fail=false:data=Some("ok")"#.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clean_session_end_re_registers_at_resubscribe_pace() {
        let (subscription, publisher) = InMemorySubscription::new();
        drop(publisher);
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane::with_log(Arc::clone(&log)));
        let h = harness_on(log, control_plane, Arc::new(subscription), RunBehaviour::Start, 1);
        let unit = Arc::new(
            Arc::try_unwrap(h.unit)
                .ok()
                .unwrap()
                .with_resubscribe_delay(Duration::from_secs(1)),
        );

        let shutdown = CancellationToken::new();
        let runner = Arc::clone(&unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { runner.run(token).await });

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        shutdown.cancel();
        assert_eq!(task.await.unwrap(), WorkerExit::UserStopped);

        let registrations = h.log.lock().iter().filter(|e| *e == "register:w-0").count();
        // every session ends at once; one registration per second, starting at 0s
        assert_eq!(registrations, 11);
    }

    #[tokio::test]
    async fn setup_failure_exits_abnormally() {
        struct Unreachable;

        #[async_trait]
        impl ControlPlane for Unreachable {
            async fn create_worker(&self) -> Result<WorkerIdentity> {
                Err(WorkerError::ControlPlaneTransport("connection refused".into()))
            }
            async fn register_worker(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn initiate_job(&self, _: &str, _: &str) -> Result<JobSpec> {
                unreachable!()
            }
            async fn complete_job(&self, _: &str, _: &str, _: Option<&[u8]>, _: bool) -> Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path(), config::Config::default()).unwrap();
        let config = FleetConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let exit = WorkerUnit::run_slot(
            0,
            &config,
            &store,
            Arc::new(Unreachable),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, WorkerExit::AbnormalError);
        assert_eq!(exit.code(), EXIT_ABNORMAL);
    }

    #[tokio::test]
    async fn registration_failure_is_abnormal() {
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane {
            log: Arc::clone(&log),
            fail_register: true,
            ..Default::default()
        });
        let h = harness_with(log, control_plane, &[], RunBehaviour::Start, 1);

        assert_eq!(
            h.unit.run(CancellationToken::new()).await,
            WorkerExit::AbnormalError
        );
        assert!(h.control_plane.completions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_re_registers_while_listening() {
        let log: Log = Arc::new(SyncMutex::new(Vec::new()));
        let control_plane = Arc::new(MockControlPlane::with_log(Arc::clone(&log)));
        let h = harness_with(log, control_plane, &[], RunBehaviour::Start, 1);
        let unit = Arc::new(
            Arc::try_unwrap(h.unit)
                .ok()
                .unwrap()
                .with_heartbeat(Some(Duration::from_secs(30))),
        );

        let shutdown = CancellationToken::new();
        let runner = Arc::clone(&unit);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { runner.run(token).await });

        tokio::time::sleep(Duration::from_secs(95)).await;
        shutdown.cancel();
        task.await.unwrap();

        let registrations = h.log.lock().iter().filter(|e| *e == "register:w-0").count();
        // once up front, then at 30s, 60s and 90s
        assert_eq!(registrations, 4);
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path(), config::Config::default()).unwrap();
        let control_plane = MockControlPlane::default();

        let first = WorkerUnit::provision(2, &store, &control_plane).await.unwrap();
        let second = WorkerUnit::provision(2, &store, &control_plane).await.unwrap();

        assert_eq!(control_plane.creates.load(Ordering::SeqCst), 1);
        assert_eq!(first.identity, second.identity);
        assert_eq!(first.credentials.dir, dir.path().join("credentials-2"));
        assert!(dir.path().join("worker_conf-2.json").exists());
        assert!(dir.path().join("credentials-2/config.json").exists());
    }

    #[tokio::test]
    async fn provisioning_failure_names_slot() {
        struct Refusing;

        #[async_trait]
        impl ControlPlane for Refusing {
            async fn create_worker(&self) -> Result<WorkerIdentity> {
                Err(WorkerError::ControlPlaneTransport("connection refused".into()))
            }
            async fn register_worker(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn initiate_job(&self, _: &str, _: &str) -> Result<JobSpec> {
                unreachable!()
            }
            async fn complete_job(&self, _: &str, _: &str, _: Option<&[u8]>, _: bool) -> Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path(), config::Config::default()).unwrap();

        let err = WorkerUnit::provision(5, &store, &Refusing).await.unwrap_err();
        assert!(matches!(err, WorkerError::IdentityProvisioning { slot: 5, .. }));
        assert!(store.load("worker_conf-5").unwrap().is_none());
    }
}
