//! Process-wide MQTT connection manager
//!
//! A [`ConnectionManager`] owns at most one live [`ClientSession`] and at most
//! one in-flight connection attempt. Concurrent callers of
//! [`ConnectionManager::ensure_connected`] share the outcome of that single
//! attempt through a `watch` channel.
//!
//! All state changes are committed while holding the manager's inner lock,
//! so subscribers and the status reporter see them in a total order. Each
//! attempt and session carries a generation number; anything that finishes
//! after a teardown bumped the generation is discarded.

pub mod session;

pub use session::{ClientSession, ManagerSnapshot, SessionError, StateTransition};

use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::mode::{ConfigMode, ModeSelector};
use crate::broker::provider::{PersistedBrokerConfig, ProviderError};
use crate::broker::resolver::{BrokerConfigResolver, EndpointSource};
use crate::error::{sanitize_error_message, GatewayResult};
use crate::observability::metrics::MetricsCollector;
use crate::status::{StatusReport, StatusReporter};
use crate::transport::mqtt::{
    ConnectionState, HealthMonitor, IncomingMessage, MqttError, ReconnectAction, ReconnectPolicy,
};
use crate::transport::{
    BrokerConnector, ConnectSettings, LinkEvent, LinkHandle, TransportNegotiator,
};
use chrono::Utc;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const TRANSITION_BUFFER: usize = 64;
const MESSAGE_BUFFER: usize = 256;
const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// Added to the CONNACK timeout before an attempt is declared dead
const CONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
enum AttemptOutcome {
    Pending,
    Connected(Arc<ClientSession>),
    Failed(SessionError),
    Superseded,
}

/// Negotiated endpoint plus where it came from
#[derive(Debug, Clone)]
struct Target {
    endpoint: BrokerEndpoint,
    mode: ConfigMode,
    source: EndpointSource,
}

impl Target {
    fn of(session: &ClientSession) -> Self {
        Self {
            endpoint: session.endpoint().clone(),
            mode: session.mode(),
            source: session.source().clone(),
        }
    }
}

struct InFlight {
    target: Target,
    outcome_rx: watch::Receiver<AttemptOutcome>,
    outcome_tx: Arc<watch::Sender<AttemptOutcome>>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct LiveSession {
    session: Arc<ClientSession>,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    live: Option<LiveSession>,
    in_flight: Option<InFlight>,
    failure: Option<SessionError>,
    /// Consecutive failed attempts; reset only on success or teardown
    failed_attempts: u32,
    total_attempts: u64,
    session_losses: u32,
    last_target: Option<Target>,
    last_error: Option<String>,
}

#[derive(Default)]
struct CommitDetails<'a> {
    target: Option<&'a Target>,
    client_id: Option<&'a str>,
    attempt: u32,
    reason: Option<&'a str>,
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    resolver: BrokerConfigResolver,
    connector: Arc<dyn BrokerConnector>,
    modes: Arc<dyn ModeSelector>,
    negotiator: TransportNegotiator,
    policy: ReconnectPolicy,
    settings: ConnectSettings,
    teardown_timeout: Duration,
    reporter: Option<StatusReporter>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ConnectionManagerBuilder {
    pub fn negotiator(mut self, negotiator: TransportNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn connect_settings(mut self, settings: ConnectSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Upper bound on closing a session during teardown
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Arc<ConnectionManager> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_BUFFER);
        let (messages_tx, _) = broadcast::channel(MESSAGE_BUFFER);

        Arc::new(ConnectionManager {
            resolver: self.resolver,
            negotiator: self.negotiator,
            policy: self.policy,
            connector: self.connector,
            modes: self.modes,
            reporter: self.reporter,
            metrics: self.metrics.unwrap_or_default(),
            settings: self.settings,
            teardown_timeout: self.teardown_timeout,
            inner: Mutex::new(Inner::default()),
            state_tx,
            transitions_tx,
            messages_tx,
            subscriptions: Mutex::new(Vec::new()),
        })
    }
}

/// Owner of the gateway's single broker connection
pub struct ConnectionManager {
    resolver: BrokerConfigResolver,
    negotiator: TransportNegotiator,
    policy: ReconnectPolicy,
    connector: Arc<dyn BrokerConnector>,
    modes: Arc<dyn ModeSelector>,
    reporter: Option<StatusReporter>,
    metrics: Arc<MetricsCollector>,
    settings: ConnectSettings,
    teardown_timeout: Duration,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<StateTransition>,
    messages_tx: broadcast::Sender<IncomingMessage>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
}

impl ConnectionManager {
    pub fn builder(
        resolver: BrokerConfigResolver,
        connector: Arc<dyn BrokerConnector>,
        modes: Arc<dyn ModeSelector>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            resolver,
            connector,
            modes,
            negotiator: TransportNegotiator::default(),
            policy: ReconnectPolicy::default(),
            settings: ConnectSettings::default(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            reporter: None,
            metrics: None,
        }
    }

    /// Return a live session for the currently resolved endpoint, joining
    /// the in-flight attempt or starting one when needed.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<Arc<ClientSession>, SessionError> {
        loop {
            if let Some(failure) = &self.inner.lock().await.failure {
                return Err(failure.clone());
            }

            let target = self.resolve_target().await;

            let outcome_rx = {
                let mut inner = self.inner.lock().await;

                if let Some(failure) = &inner.failure {
                    return Err(failure.clone());
                }

                if let Some(live) = &inner.live {
                    if live.session.endpoint() == &target.endpoint {
                        return Ok(live.session.clone());
                    }
                }
                if inner.live.is_some() {
                    info!(
                        endpoint = %target.endpoint,
                        mode = %target.mode,
                        "Resolved broker endpoint changed, replacing session"
                    );
                    self.teardown_locked(&mut inner, "broker endpoint changed")
                        .await;
                }

                let attach = inner.in_flight.as_ref().and_then(|flight| {
                    (flight.target.endpoint == target.endpoint && !flight.task.is_finished())
                        .then(|| flight.outcome_rx.clone())
                });

                match attach {
                    Some(rx) => {
                        debug!(endpoint = %target.endpoint, "Joining in-flight connection attempt");
                        rx
                    }
                    None => {
                        if inner.in_flight.is_some() {
                            self.teardown_locked(&mut inner, "broker endpoint changed")
                                .await;
                        }
                        self.start_attempt_locked(
                            &mut inner,
                            target,
                            None,
                            ConnectionState::Connecting,
                            None,
                        )
                    }
                }
            };

            if let Some(result) = await_outcome(outcome_rx).await {
                return result;
            }
            debug!("Connection attempt superseded, re-evaluating");
        }
    }

    /// Tear everything down, clear `Failed`, and connect afresh
    pub async fn reconnect(self: &Arc<Self>) -> Result<Arc<ClientSession>, SessionError> {
        {
            let mut inner = self.inner.lock().await;
            self.teardown_locked(&mut inner, "reconnect requested").await;
        }
        self.ensure_connected().await
    }

    /// Close the live session and abandon any in-flight attempt
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown_locked(&mut inner, "disconnect requested")
            .await;
    }

    /// Clear a terminal failure. Returns false when the manager was not `Failed`.
    pub async fn reset(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.failure.take().is_none() {
            return false;
        }
        inner.failed_attempts = 0;
        inner.generation += 1;
        self.commit(
            &inner,
            ConnectionState::Disconnected,
            CommitDetails {
                reason: Some("failure reset"),
                ..Default::default()
            },
        );
        true
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions_tx.subscribe()
    }

    /// Incoming publishes from whichever session is live
    pub fn messages(&self) -> broadcast::Receiver<IncomingMessage> {
        self.messages_tx.subscribe()
    }

    pub async fn current_session(&self) -> Option<Arc<ClientSession>> {
        self.inner
            .lock()
            .await
            .live
            .as_ref()
            .map(|live| live.session.clone())
    }

    pub async fn current_mode(&self) -> ConfigMode {
        self.modes.current_mode().await
    }

    /// Live persisted-configuration lookup, bounded by the resolver timeout
    pub async fn active_config(&self) -> Result<Option<PersistedBrokerConfig>, ProviderError> {
        self.resolver.active_config().await
    }

    /// Endpoint the manager would use right now, after negotiation
    pub async fn resolved_endpoint(&self) -> BrokerEndpoint {
        self.resolve_target().await.endpoint
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub async fn publish(
        self: &Arc<Self>,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> GatewayResult<()> {
        let session = self.ensure_connected().await?;
        session.publish(topic, payload, qos, retain).await?;
        Ok(())
    }

    /// Subscribe now and on every future session
    pub async fn subscribe(self: &Arc<Self>, topic: &str, qos: QoS) -> GatewayResult<()> {
        {
            let mut subscriptions = self.subscriptions.lock().await;
            match subscriptions.iter_mut().find(|(t, _)| t == topic) {
                Some(existing) => existing.1 = qos,
                None => subscriptions.push((topic.to_string(), qos)),
            }
        }
        let session = self.ensure_connected().await?;
        session.subscribe(topic, qos).await?;
        Ok(())
    }

    pub async fn unsubscribe(self: &Arc<Self>, topic: &str) -> GatewayResult<()> {
        self.subscriptions.lock().await.retain(|(t, _)| t != topic);
        if let Some(session) = self.current_session().await {
            session.unsubscribe(topic).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> ManagerSnapshot {
        let subscriptions = self
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect();

        let inner = self.inner.lock().await;
        let state = self.current_state();
        let (target, client_id, connected_since, uptime) = match &inner.live {
            Some(live) => (
                Some(Target::of(&live.session)),
                Some(live.session.client_id().to_string()),
                Some(live.session.connected_at()),
                Some(live.session.uptime()),
            ),
            None => (inner.last_target.clone(), None, None, None),
        };

        let metrics = HealthMonitor::calculate_health_metrics(
            state,
            uptime,
            inner.session_losses,
            inner.failed_attempts,
        );
        let quality = HealthMonitor::assess_connection_quality(&metrics);

        ManagerSnapshot {
            state,
            generation: inner.generation,
            broker_url: target.as_ref().map(|t| t.endpoint.redacted_url()),
            mode: target.as_ref().map(|t| t.mode),
            source: target.map(|t| t.source),
            client_id,
            connected_since,
            failed_attempts: inner.failed_attempts,
            max_attempts: self.policy.max_attempts(),
            total_attempts: inner.total_attempts,
            last_error: inner.last_error.clone(),
            subscriptions,
            metrics,
            quality,
        }
    }

    async fn resolve_target(&self) -> Target {
        let mode = self.modes.current_mode().await;
        let resolved = self.resolver.resolve(mode).await;
        Target {
            endpoint: self.negotiator.negotiate(&resolved.endpoint),
            mode: resolved.mode,
            source: resolved.source,
        }
    }

    /// Record a state change. Must be called with the inner lock held.
    fn commit(&self, inner: &Inner, to: ConnectionState, details: CommitDetails<'_>) -> bool {
        let from = self.current_state();
        if from == to && to != ConnectionState::Reconnecting {
            return true;
        }
        if !HealthMonitor::is_valid_transition(from, to) {
            error!(%from, %to, "Refusing invalid connection state transition");
            return false;
        }

        self.state_tx.send_replace(to);

        let target = details.target.or(inner.last_target.as_ref());
        let broker_url = target.map(|t| t.endpoint.redacted_url());
        HealthMonitor::log_state_transition(from, to, broker_url.as_deref(), details.reason);

        let transition = StateTransition {
            from,
            to,
            generation: inner.generation,
            broker_url,
            mode: target.map(|t| t.mode),
            client_id: details.client_id.map(str::to_string),
            attempt: details.attempt,
            reason: details.reason.map(str::to_string),
            at: Utc::now(),
        };

        self.metrics.record_state(to);
        if let Some(reporter) = &self.reporter {
            reporter.report(StatusReport::from_transition(&transition));
        }
        // No receivers is fine
        let _ = self.transitions_tx.send(transition);
        true
    }

    fn start_attempt_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        target: Target,
        initial_delay: Option<Duration>,
        state: ConnectionState,
        reason: Option<String>,
    ) -> watch::Receiver<AttemptOutcome> {
        if let Some(previous) = inner.in_flight.take() {
            abandon(previous);
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.last_target = Some(target.clone());

        self.commit(
            inner,
            state,
            CommitDetails {
                target: Some(&target),
                attempt: inner.failed_attempts + 1,
                reason: reason.as_deref(),
                ..Default::default()
            },
        );

        let (outcome_tx, outcome_rx) = watch::channel(AttemptOutcome::Pending);
        let outcome_tx = Arc::new(outcome_tx);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let span = crate::mqtt_span!(operation = "connect", generation, endpoint = %target.endpoint);
        let driver = self.clone().drive_attempt(
            generation,
            target.clone(),
            outcome_tx.clone(),
            cancel_rx,
            initial_delay,
        );
        let task = tokio::spawn(driver.instrument(span));

        inner.in_flight = Some(InFlight {
            target,
            outcome_rx: outcome_rx.clone(),
            outcome_tx,
            cancel_tx,
            task,
        });
        outcome_rx
    }

    async fn drive_attempt(
        self: Arc<Self>,
        generation: u64,
        target: Target,
        outcome: Arc<watch::Sender<AttemptOutcome>>,
        mut cancel: watch::Receiver<bool>,
        mut delay: Option<Duration>,
    ) {
        loop {
            if let Some(delay) = delay.take() {
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before next connection attempt");
                if !sleep_unless_cancelled(delay, &mut cancel).await {
                    debug!("Backoff interrupted, attempt abandoned");
                    return;
                }
            }

            let Some((client_id, attempt)) = self.begin_try(generation).await else {
                return;
            };

            debug!(client_id = %client_id, attempt, "Connecting to broker");
            let connect = self
                .connector
                .connect(&target.endpoint, &self.settings, &client_id);
            let result =
                match tokio::time::timeout(self.settings.connect_timeout + CONNECT_GRACE, connect)
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(MqttError::ConnAckTimeout(self.settings.connect_timeout)),
                };

            match result {
                Ok(handle) => {
                    self.on_attempt_succeeded(generation, &target, client_id, attempt, handle, &outcome)
                        .await;
                    return;
                }
                Err(e) => {
                    match self
                        .on_attempt_failed(generation, &target, &client_id, e, &outcome)
                        .await
                    {
                        Some(next) => delay = Some(next),
                        None => return,
                    }
                }
            }
        }
    }

    async fn begin_try(&self, generation: u64) -> Option<(String, u32)> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return None;
        }
        inner.total_attempts += 1;
        self.metrics.mqtt_connection_attempt();
        Some((self.settings.generate_client_id(), inner.failed_attempts + 1))
    }

    async fn on_attempt_succeeded(
        self: &Arc<Self>,
        generation: u64,
        target: &Target,
        client_id: String,
        attempt: u32,
        handle: LinkHandle,
        outcome: &watch::Sender<AttemptOutcome>,
    ) {
        let LinkHandle { link, events } = handle;
        let mut inner = self.inner.lock().await;

        if inner.generation != generation {
            drop(inner);
            self.metrics.mqtt_late_result_discarded();
            debug!(client_id = %client_id, "Closing connection from superseded attempt");
            if tokio::time::timeout(self.teardown_timeout, link.close())
                .await
                .is_err()
            {
                warn!(client_id = %client_id, "Timed out closing superseded connection");
            }
            return;
        }

        let session = Arc::new(ClientSession::new(
            client_id,
            target.endpoint.clone(),
            target.mode,
            target.source.clone(),
            attempt,
            generation,
            link,
        ));

        inner.failed_attempts = 0;
        inner.failure = None;
        inner.last_error = None;
        inner.in_flight = None;
        self.metrics.mqtt_connection_established();

        let watcher = tokio::spawn(self.clone().watch_link(session.clone(), events));
        inner.live = Some(LiveSession {
            session: session.clone(),
            watcher,
        });

        self.commit(
            &inner,
            ConnectionState::Connected,
            CommitDetails {
                target: Some(target),
                client_id: Some(session.client_id()),
                attempt,
                reason: None,
            },
        );
        outcome.send_replace(AttemptOutcome::Connected(session.clone()));
        drop(inner);

        self.restore_subscriptions(&session).await;
    }

    /// Returns the delay before the next try, or `None` when the attempt is over
    async fn on_attempt_failed(
        &self,
        generation: u64,
        target: &Target,
        client_id: &str,
        error: MqttError,
        outcome: &watch::Sender<AttemptOutcome>,
    ) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            self.metrics.mqtt_late_result_discarded();
            debug!(client_id = %client_id, error = %error, "Ignoring failure of superseded attempt");
            return None;
        }

        let reason = sanitize_error_message(&error.to_string());
        inner.last_error = Some(reason.clone());

        if !error.is_retryable() {
            self.metrics.mqtt_configuration_failed();
            self.fail_locked(
                &mut inner,
                target,
                client_id,
                SessionError::Configuration(reason),
                outcome,
            );
            return None;
        }

        self.metrics.mqtt_connection_failed();
        inner.failed_attempts += 1;
        let failed = inner.failed_attempts;

        match self.policy.on_attempt_failed(failed) {
            ReconnectAction::RetryAfter(delay) => {
                self.commit(
                    &inner,
                    ConnectionState::Reconnecting,
                    CommitDetails {
                        target: Some(target),
                        client_id: Some(client_id),
                        attempt: failed + 1,
                        reason: Some(&reason),
                    },
                );
                Some(delay)
            }
            ReconnectAction::GiveUp => {
                self.metrics.mqtt_retries_exhausted();
                self.fail_locked(
                    &mut inner,
                    target,
                    client_id,
                    SessionError::RetriesExhausted {
                        attempts: failed,
                        last_error: reason,
                    },
                    outcome,
                );
                None
            }
        }
    }

    fn fail_locked(
        &self,
        inner: &mut Inner,
        target: &Target,
        client_id: &str,
        failure: SessionError,
        outcome: &watch::Sender<AttemptOutcome>,
    ) {
        inner.failure = Some(failure.clone());
        inner.in_flight = None;
        let reason = failure.to_string();
        self.commit(
            inner,
            ConnectionState::Failed,
            CommitDetails {
                target: Some(target),
                client_id: Some(client_id),
                attempt: inner.failed_attempts,
                reason: Some(&reason),
            },
        );
        outcome.send_replace(AttemptOutcome::Failed(failure));
    }

    async fn watch_link(
        self: Arc<Self>,
        session: Arc<ClientSession>,
        mut events: mpsc::Receiver<LinkEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Message(message) => {
                    if session.is_retired() {
                        self.metrics.mqtt_late_result_discarded();
                        continue;
                    }
                    self.metrics.mqtt_message_received();
                    let _ = self.messages_tx.send(message);
                }
                LinkEvent::Closed(reason) => {
                    self.on_link_lost(&session, reason).await;
                    return;
                }
            }
        }

        if !session.is_retired() {
            self.on_link_lost(&session, "link event stream ended".to_string())
                .await;
        }
    }

    async fn on_link_lost(self: &Arc<Self>, session: &Arc<ClientSession>, reason: String) {
        let mut inner = self.inner.lock().await;
        let is_current = inner
            .live
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(&live.session, session));
        if !is_current || session.is_retired() {
            debug!(client_id = %session.client_id(), "Ignoring close of retired session");
            return;
        }
        let Some(live) = inner.live.take() else {
            return;
        };

        live.session.retire();
        inner.session_losses += 1;
        self.metrics.mqtt_connection_lost();

        let link = live.session.link().clone();
        let teardown_timeout = self.teardown_timeout;
        tokio::spawn(async move {
            let _ = tokio::time::timeout(teardown_timeout, link.close()).await;
        });

        let delay = self.policy.link_loss_delay();
        self.start_attempt_locked(
            &mut inner,
            Target::of(session),
            Some(delay),
            ConnectionState::Reconnecting,
            Some(sanitize_error_message(&reason)),
        );
    }

    async fn restore_subscriptions(&self, session: &ClientSession) {
        let subscriptions = self.subscriptions.lock().await.clone();
        for (topic, qos) in subscriptions {
            if let Err(e) = session.subscribe(&topic, qos).await {
                warn!(topic = %topic, error = %e, "Failed to restore subscription");
            }
        }
    }

    /// Retire the live session, abandon the in-flight attempt, and commit
    /// `Disconnected`. Closing is bounded by the teardown timeout.
    async fn teardown_locked(&self, inner: &mut Inner, reason: &str) {
        inner.generation += 1;
        inner.failure = None;
        inner.failed_attempts = 0;

        if let Some(flight) = inner.in_flight.take() {
            debug!(endpoint = %flight.target.endpoint, "Abandoning in-flight connection attempt");
            abandon(flight);
        }

        if let Some(live) = inner.live.take() {
            live.session.retire();
            live.watcher.abort();
            let client_id = live.session.client_id().to_string();
            match tokio::time::timeout(self.teardown_timeout, live.session.link().close()).await {
                Ok(Ok(())) => debug!(client_id = %client_id, "Session closed"),
                Ok(Err(e)) => warn!(client_id = %client_id, error = %e, "Error closing session"),
                Err(_) => warn!(
                    client_id = %client_id,
                    timeout_ms = self.teardown_timeout.as_millis() as u64,
                    "Session close timed out, abandoning"
                ),
            }
        }

        self.commit(
            inner,
            ConnectionState::Disconnected,
            CommitDetails {
                reason: Some(reason),
                ..Default::default()
            },
        );
    }
}

fn abandon(flight: InFlight) {
    let _ = flight.cancel_tx.send(true);
    flight.outcome_tx.send_replace(AttemptOutcome::Superseded);
}

/// `None` means the attempt was superseded and the caller should re-evaluate
async fn await_outcome(
    mut rx: watch::Receiver<AttemptOutcome>,
) -> Option<Result<Arc<ClientSession>, SessionError>> {
    loop {
        let outcome = rx.borrow_and_update().clone();
        match outcome {
            AttemptOutcome::Pending => {}
            AttemptOutcome::Connected(session) => return Some(Ok(session)),
            AttemptOutcome::Failed(e) => return Some(Err(e)),
            AttemptOutcome::Superseded => return None,
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

/// False when cancelled before the delay elapsed
async fn sleep_unless_cancelled(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.changed() => false,
    }
}
