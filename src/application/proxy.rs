//! Proxy-publish application
//!
//! Mirrors every forwardable inbound stream to the configured target servers.
//! The forwarding pass runs synchronously inside the registration callback:
//! targets are tried one after another in configuration order, each through
//! the outbound handler registered for the target's scheme. A push only
//! reports local failures synchronously; remote outcomes are collected by a
//! watcher task and show up in the logs and in [`RelayStats`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use super::base::BaseApplication;
use super::config::{is_rtmp_family, ApplicationConfig};
use crate::error::{ConfigError, Result};
use crate::handler::{
    AppProtocolHandler, HandlerRegistry, HandlerSet, ProtocolType, PushError, PushHandle,
    PushOutcome,
};
use crate::registry::{InboundStream, StreamListener, StreamsManager};
use crate::stats::RelayStats;

/// Where one target ended up during a forwarding pass
#[derive(Debug)]
pub enum TargetState {
    /// Skipped because an earlier target aborted the pass
    NotAttempted,
    /// The stream name did not pass the target's filter
    FilteredOut,
    /// Push requested; the handle resolves with the remote outcome
    Forwarded(PushHandle),
    Failed(PushError),
}

impl TargetState {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, TargetState::Forwarded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TargetState::Failed(_))
    }
}

/// Result of evaluating every target for one inbound stream
#[derive(Debug)]
pub struct ForwardingPass {
    pub stream_id: u32,
    /// One entry per configured target, in configuration order
    pub attempts: Vec<(String, TargetState)>,
    /// A failure stopped the pass under `abortOnConnectError`
    pub aborted: bool,
}

impl ForwardingPass {
    pub fn state(&self, target: &str) -> Option<&TargetState> {
        self.attempts
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, state)| state)
    }

    pub fn forwarded_count(&self) -> usize {
        self.attempts.iter().filter(|(_, s)| s.is_forwarded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.iter().filter(|(_, s)| s.is_failed()).count()
    }
}

pub struct ProxyPublishApplication {
    base: BaseApplication,
    config: ApplicationConfig,
    registry: Arc<HandlerRegistry>,
    handlers: HandlerSet,
    streams: Arc<StreamsManager>,
    stats: Arc<RelayStats>,
    registered_tags: Mutex<Vec<ProtocolType>>,
    shut_down: AtomicBool,
}

impl ProxyPublishApplication {
    /// Start the application with every handler compiled into this build
    pub fn initialize(
        config: ApplicationConfig,
        registry: Arc<HandlerRegistry>,
        streams: Arc<StreamsManager>,
    ) -> Result<Arc<Self>> {
        let handlers = HandlerSet::compiled_in(&streams, &config.outbound);
        Self::with_handlers(config, registry, streams, handlers)
    }

    /// Start the application with an explicit handler set
    ///
    /// Fails without side effects when a target cannot be served or a
    /// protocol tag is already taken.
    pub fn with_handlers(
        config: ApplicationConfig,
        registry: Arc<HandlerRegistry>,
        streams: Arc<StreamsManager>,
        handlers: HandlerSet,
    ) -> Result<Arc<Self>> {
        validate_targets(&config)?;

        let mut registered = Vec::new();
        for handler in handlers.handlers() {
            if let Err(e) = registry.register_all(Arc::clone(handler)) {
                for tag in registered.drain(..) {
                    registry.unregister(tag);
                }
                return Err(e.into());
            }
            registered.extend_from_slice(handler.protocol_types());
        }

        let app = Arc::new(Self {
            base: BaseApplication::new(config.name.clone()),
            config,
            registry,
            handlers,
            streams: Arc::clone(&streams),
            stats: Arc::new(RelayStats::new()),
            registered_tags: Mutex::new(registered),
            shut_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&app);
        let listener: Weak<dyn StreamListener> = weak;
        streams.set_listener(listener);

        tracing::info!(
            application = %app.config.name,
            targets = app.config.target_servers.len(),
            abort_on_connect_error = app.config.abort_on_connect_error,
            "Application initialized"
        );
        Ok(app)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    pub fn base(&self) -> &BaseApplication {
        &self.base
    }

    pub fn streams(&self) -> &Arc<StreamsManager> {
        &self.streams
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Forward `stream` to its targets
    ///
    /// Returns false when the pass was aborted; the caller tears the stream
    /// down in that case.
    pub fn initiate_forwarding_stream(&self, stream: &Arc<InboundStream>) -> bool {
        let pass = self.forwarding_pass(stream);
        let aborted = pass.aborted;
        self.watch_outcomes(stream, pass);
        !aborted
    }

    /// Evaluate every target for `stream`, in configuration order
    pub fn forwarding_pass(&self, stream: &Arc<InboundStream>) -> ForwardingPass {
        let targets = Arc::clone(&self.config.target_servers);
        let mut attempts = Vec::with_capacity(targets.len());
        let mut aborted = false;

        for (target_name, descriptor) in targets.iter() {
            if aborted {
                attempts.push((target_name.clone(), TargetState::NotAttempted));
                continue;
            }

            if !descriptor.matches_stream(stream.name()) {
                tracing::trace!(
                    stream_id = stream.id(),
                    name = stream.name(),
                    target = %target_name,
                    "Stream filtered out"
                );
                self.stats.target_filtered();
                attempts.push((target_name.clone(), TargetState::FilteredOut));
                continue;
            }

            let params = descriptor.forward_params(target_name, stream.name());
            let result = self
                .outbound_handler(&params.target_uri.scheme)
                .and_then(|handler| handler.push_local_stream(stream, &params));
            self.stats.push_requested();

            match result {
                Ok(handle) => {
                    tracing::debug!(
                        stream_id = stream.id(),
                        target = %params.target_uri,
                        target_stream = %params.target_stream_name,
                        request_id = handle.request_id(),
                        "Push requested"
                    );
                    attempts.push((target_name.clone(), TargetState::Forwarded(handle)));
                }
                Err(e) => {
                    tracing::warn!(
                        stream_id = stream.id(),
                        stream_type = %stream.stream_type(),
                        name = stream.name(),
                        application = %self.config.name,
                        target = %params.target_uri,
                        error = %e,
                        "Unable to forward stream"
                    );
                    self.stats.push_failed();
                    attempts.push((target_name.clone(), TargetState::Failed(e)));
                    if self.config.abort_on_connect_error {
                        aborted = true;
                        self.stats.pass_aborted();
                    }
                }
            }
        }

        ForwardingPass {
            stream_id: stream.id(),
            attempts,
            aborted,
        }
    }

    fn outbound_handler(
        &self,
        scheme: &str,
    ) -> std::result::Result<Arc<dyn AppProtocolHandler>, PushError> {
        ProtocolType::outbound_for_scheme(scheme)
            .and_then(|tag| self.registry.get(tag))
            .ok_or_else(|| PushError::Unsupported(scheme.to_string()))
    }

    fn watch_outcomes(&self, stream: &Arc<InboundStream>, pass: ForwardingPass) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => return,
        };

        for (target_name, state) in pass.attempts {
            let TargetState::Forwarded(handle) = state else {
                continue;
            };
            let stats = Arc::clone(&self.stats);
            let stream_id = stream.id();
            runtime.spawn(async move {
                match handle.outcome().await {
                    PushOutcome::Published {
                        target_stream_name,
                        message_stream_id,
                    } => {
                        stats.published();
                        tracing::info!(
                            stream_id = stream_id,
                            target = %target_name,
                            target_stream = %target_stream_name,
                            message_stream_id = message_stream_id,
                            "Stream published on target"
                        );
                    }
                    PushOutcome::Failed(reason) => {
                        stats.rejected();
                        tracing::warn!(
                            stream_id = stream_id,
                            target = %target_name,
                            reason = %reason,
                            "Target did not accept stream"
                        );
                    }
                }
            });
        }
    }

    /// Unregister the handlers and release their outbound resources
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.streams.clear_listener();
        for tag in self.registered_tags.lock().drain(..) {
            self.registry.unregister(tag);
        }
        for handler in self.handlers.handlers() {
            handler.shutdown();
        }
        tracing::info!(application = %self.config.name, "Application shut down");
    }
}

impl StreamListener for ProxyPublishApplication {
    fn on_stream_registered(&self, stream: &Arc<InboundStream>) {
        self.base.on_stream_registered(stream);
        self.stats.stream_seen();

        if !stream.stream_type().is_forwardable() {
            tracing::trace!(
                stream_id = stream.id(),
                stream_type = %stream.stream_type(),
                "Stream type is not forwarded"
            );
            self.stats.stream_ignored();
            return;
        }

        if !self.initiate_forwarding_stream(stream) {
            tracing::error!(
                stream_id = stream.id(),
                stream_type = %stream.stream_type(),
                name = stream.name(),
                application = %self.config.name,
                "Forwarding aborted, tearing stream down"
            );
            stream.request_teardown();
        }
    }

    fn on_stream_unregistered(&self, stream: &Arc<InboundStream>) {
        self.base.on_stream_unregistered(stream);
    }
}

impl Drop for ProxyPublishApplication {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_targets(config: &ApplicationConfig) -> std::result::Result<(), ConfigError> {
    for (target, descriptor) in config.target_servers.iter() {
        let scheme = &descriptor.target_uri.scheme;
        if !is_rtmp_family(scheme) || ProtocolType::outbound_for_scheme(scheme).is_none() {
            return Err(ConfigError::UnsupportedScheme {
                target: target.clone(),
                scheme: scheme.clone(),
            });
        }
    }
    Ok(())
}
