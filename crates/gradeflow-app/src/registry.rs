// Provider registry: which providers and models exist, which one is selected,
// and building a grading provider for the current selection.
//
// The selection lives in the client-local provider file. Liveness of probe
// capable providers is cached from the last `list_providers` call and used to
// fail fast at resolve time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use gradeflow_core::config::{
    ConfigError, Credential, GradingMode, ProviderConfigStore, ProviderEndpoints, ProviderSelection,
    Settings,
};
use gradeflow_core::ProviderKind;
use gradeflow_llm::{probe_ollama, GradingProvider, LlmClient, LlmGrader};

use crate::backend::{Backend, BackendGrader};
use crate::error::GradeError;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Online,
    Offline,
    NotProbed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub requires_credential: bool,
    pub status: ProbeStatus,
}

/// The selection as shown to callers. Secrets are never included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConfigView {
    pub provider: ProviderKind,
    pub model: String,
    pub has_credential: bool,
}

// ---------------------------------------------------------------------------
// ProviderResolver
// ---------------------------------------------------------------------------

/// Produces the grading provider to use right now.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self) -> Result<Arc<dyn GradingProvider>, GradeError>;
}

/// Always resolves to the same provider.
pub struct FixedProvider(pub Arc<dyn GradingProvider>);

impl ProviderResolver for FixedProvider {
    fn resolve(&self) -> Result<Arc<dyn GradingProvider>, GradeError> {
        Ok(Arc::clone(&self.0))
    }
}

// ---------------------------------------------------------------------------
// ProviderRegistry
// ---------------------------------------------------------------------------

pub struct ProviderRegistry {
    config: ProviderConfigStore,
    endpoints: ProviderEndpoints,
    max_tokens: u32,
    http: reqwest::Client,
    /// Set in backend grading mode.
    backend: Option<Arc<dyn Backend>>,
    probes: Mutex<HashMap<ProviderKind, bool>>,
    /// Serializes load-modify-save of the provider file.
    write_lock: Mutex<()>,
}

impl ProviderRegistry {
    pub fn new(config: ProviderConfigStore, settings: &Settings, http: reqwest::Client) -> Self {
        ProviderRegistry {
            config,
            endpoints: settings.providers.clone(),
            max_tokens: settings.grading.max_tokens,
            http,
            backend: None,
            probes: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Route grading through the backend instead of calling a model directly.
    pub fn with_backend_grading(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the registry for `settings.grading.mode`.
    pub fn for_mode(
        config: ProviderConfigStore,
        settings: &Settings,
        http: reqwest::Client,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let registry = Self::new(config, settings, http);
        match settings.grading.mode {
            GradingMode::Direct => registry,
            GradingMode::Backend => registry.with_backend_grading(backend),
        }
    }

    /// All providers in catalog order, probing those that support it.
    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let mut out = Vec::with_capacity(ProviderKind::ALL.len());
        for kind in ProviderKind::ALL {
            let status = if kind.supports_probe() {
                let online = self.probe(kind).await;
                self.probes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(kind, online);
                if online {
                    ProbeStatus::Online
                } else {
                    ProbeStatus::Offline
                }
            } else {
                ProbeStatus::NotProbed
            };
            out.push(ProviderInfo {
                id: kind.id(),
                display_name: kind.display_name(),
                requires_credential: kind.requires_credential(),
                status,
            });
        }
        out
    }

    async fn probe(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Ollama => {
                probe_ollama(
                    &self.http,
                    &self.endpoints.ollama_url,
                    self.endpoints.probe_timeout(),
                )
                .await
            }
            _ => true,
        }
    }

    /// Result of the last probe for `kind`.
    pub fn cached_status(&self, kind: ProviderKind) -> ProbeStatus {
        match self.probes.lock().unwrap_or_else(PoisonError::into_inner).get(&kind) {
            Some(true) => ProbeStatus::Online,
            Some(false) => ProbeStatus::Offline,
            None => ProbeStatus::NotProbed,
        }
    }

    pub fn list_models(&self, provider_id: &str) -> Result<Vec<String>, GradeError> {
        let kind = parse_provider(provider_id)?;
        Ok(kind.models().into_iter().map(String::from).collect())
    }

    pub fn get_config(&self) -> Result<ProviderConfigView, GradeError> {
        let selection = self.load()?;
        Ok(self.view(&selection))
    }

    /// Select a provider and model and optionally store a credential.
    ///
    /// An empty `model_id` selects the provider's first model. A blank
    /// `credential` leaves any stored credential unchanged.
    pub fn set_config(
        &self,
        provider_id: &str,
        model_id: &str,
        credential: &str,
    ) -> Result<ProviderConfigView, GradeError> {
        let kind = parse_provider(provider_id)?;
        let model_id = model_id.trim();
        let model = if model_id.is_empty() {
            kind.default_model()
        } else if kind.has_model(model_id) {
            kind.resolve_model(Some(model_id))
        } else {
            return Err(GradeError::Validation(format!(
                "model '{model_id}' is not offered by {}",
                kind.display_name()
            )));
        };

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut selection = self.load()?;
        selection.provider = Some(kind);
        selection.model = Some(model.to_string());
        selection.set_credential(kind, Credential::new(credential));
        self.config
            .save(&selection)
            .map_err(|e| GradeError::Persistence(e.to_string()))?;

        info!("Provider set to {} ({})", kind, model);
        Ok(self.view(&selection))
    }

    fn load(&self) -> Result<ProviderSelection, GradeError> {
        self.config.load().map_err(|e: ConfigError| {
            warn!("Could not read {}: {e}", self.config.path().display());
            GradeError::Persistence(e.to_string())
        })
    }

    fn view(&self, selection: &ProviderSelection) -> ProviderConfigView {
        let provider = selection.provider();
        ProviderConfigView {
            provider,
            model: selection.model().to_string(),
            has_credential: selection.credential(provider).is_some(),
        }
    }

    /// Stored credential, else the provider's environment variable.
    fn credential_for(selection: &ProviderSelection, kind: ProviderKind) -> Option<Credential> {
        selection.credential(kind).or_else(|| {
            let var = kind.credential_env_var()?;
            let value = std::env::var(var).ok()?;
            debug!("Using {var} for {kind}");
            Credential::new(&value)
        })
    }
}

impl ProviderResolver for ProviderRegistry {
    fn resolve(&self) -> Result<Arc<dyn GradingProvider>, GradeError> {
        if let Some(backend) = &self.backend {
            return Ok(Arc::new(BackendGrader::new(Arc::clone(backend))));
        }

        let selection = self.load()?;
        let kind = selection.provider();
        if kind.supports_probe() && self.cached_status(kind) == ProbeStatus::Offline {
            return Err(GradeError::ProviderUnreachable(format!(
                "{} did not answer the last probe",
                kind.display_name()
            )));
        }

        let client = LlmClient::for_provider(
            kind,
            selection.model(),
            Self::credential_for(&selection, kind),
            &self.endpoints,
            self.http.clone(),
        )?;
        Ok(Arc::new(LlmGrader::new(client, self.max_tokens)))
    }
}

fn parse_provider(id: &str) -> Result<ProviderKind, GradeError> {
    ProviderKind::from_id(id.trim())
        .ok_or_else(|| GradeError::Validation(format!("unknown provider '{id}'")))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
