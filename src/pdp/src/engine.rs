//! Engine facade
//!
//! The single public entry point: normalize the request, run the phase
//! pipeline, assemble the access record, and hand it to the log writer.
//! Construction wires the backend and sink and captures the audit
//! environment once; destruction is immediate because in-flight
//! authorizations hold their own references to the domain model.

use crate::accesslog::{AccessLog, LogWriter};
use crate::backend::{Backend, RegistryBackend};
use crate::config::EngineConfig;
use crate::error::{PdpError, Result};
use crate::phases;
use crate::policy::PolicyCompiler;
use crate::porc::{self, RawPorc};
use crate::record::{AccessRecord, Decision, RecordMetadata, RecordPrincipal};
use meridian_bundle::Registry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Dry-run: evaluate fully but skip the audit enqueue
    pub probe: bool,

    /// Overrides the engine's default deadline
    pub deadline: Option<Duration>,

    /// Caller-supplied cancellation, linked to the deadline
    pub cancellation: Option<CancellationToken>,
}

/// The policy decision engine
pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn Backend>,
    writer: LogWriter,
    env: BTreeMap<String, String>,
}

impl Engine {
    /// Wire an engine over an existing backend and sink
    pub fn new(config: EngineConfig, backend: Arc<dyn Backend>, sink: Arc<dyn AccessLog>) -> Self {
        let env = capture_env(&config.audit_env);
        let writer = LogWriter::spawn(sink, config.log_buffer_capacity);

        info!(
            anti_lockout_roles = config.anti_lockout_roles.len(),
            mock = config.mock,
            "engine initialized"
        );

        Self {
            config,
            backend,
            writer,
            env,
        }
    }

    /// Build the registry backend and wire an engine over it
    ///
    /// Compiles every policy with the configured unsafe built-ins banned;
    /// any compile failure or unresolved reference aborts construction.
    pub fn with_registry(
        config: EngineConfig,
        registry: Arc<Registry>,
        sink: Arc<dyn AccessLog>,
    ) -> Result<Self> {
        let compiler = PolicyCompiler::new(config.unsafe_builtins.iter().cloned());
        let backend = Arc::new(RegistryBackend::new(registry, &compiler)?);
        Ok(Self::new(config, backend, sink))
    }

    /// Authorize a request supplied as JSON text
    pub async fn authorize_json(
        &self,
        raw: &str,
        options: AuthorizeOptions,
    ) -> Result<(Decision, AccessRecord)> {
        let raw: RawPorc = serde_json::from_str(raw)
            .map_err(|e| PdpError::InvalidRequest(e.to_string()))?;
        self.authorize(raw, options).await
    }

    /// Authorize a request supplied as a pre-parsed JSON value
    pub async fn authorize_value(
        &self,
        raw: Value,
        options: AuthorizeOptions,
    ) -> Result<(Decision, AccessRecord)> {
        let raw: RawPorc = serde_json::from_value(raw)
            .map_err(|e| PdpError::InvalidRequest(e.to_string()))?;
        self.authorize(raw, options).await
    }

    /// Authorize a request
    ///
    /// The only path to GRANT is an explicit positive policy vote: errors
    /// on the decision path become deny votes in the record, and the
    /// deadline cancels outstanding evaluations rather than aborting the
    /// request, so the record still carries the partial trace.
    pub async fn authorize(
        &self,
        raw: RawPorc,
        options: AuthorizeOptions,
    ) -> Result<(Decision, AccessRecord)> {
        let token = options.cancellation.unwrap_or_default();
        let deadline = options.deadline.unwrap_or(self.config.default_deadline);

        let deadline_token = token.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            deadline_token.cancel();
        });

        let result = self.authorize_inner(raw, &token, options.probe).await;
        watchdog.abort();
        result
    }

    async fn authorize_inner(
        &self,
        raw: RawPorc,
        token: &CancellationToken,
        probe: bool,
    ) -> Result<(Decision, AccessRecord)> {
        let porc = porc::normalize(self.backend.as_ref(), raw, token).await?;
        let input = porc.wire();

        let report = phases::evaluate(
            self.backend.as_ref(),
            &porc,
            &input,
            &self.config.anti_lockout_roles,
            token,
        )
        .await;

        let record = AccessRecord {
            metadata: RecordMetadata::new(self.env.clone()),
            principal: RecordPrincipal {
                subject: porc.principal.sub.clone().unwrap_or_default(),
                realm: porc.principal.mrealm.clone().unwrap_or_default(),
            },
            operation: porc.operation.clone(),
            resource: porc.resource.mrn.clone(),
            decision: report.decision,
            system_override: report.system_override,
            override_reason: report.override_reason,
            references: report.references,
            porc: serde_json::to_string(&input)?,
        };

        debug!(
            operation = %record.operation,
            resource = %record.resource,
            decision = ?record.decision,
            system_override = record.system_override,
            references = record.references.len(),
            "authorization complete"
        );

        if !probe {
            self.writer.enqueue(record.clone());
        }

        Ok((report.decision, record))
    }
}

/// Capture the configured environment variables once
fn capture_env(mapping: &std::collections::HashMap<String, String>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (variable, key) in mapping {
        if let Ok(value) = std::env::var(variable) {
            env.insert(key.clone(), value);
        }
    }
    env
}
