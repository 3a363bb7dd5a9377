use crate::model::{ChatCompletionsModel, IntentModel, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::rules::match_rules;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use warden_types::{ConfidenceSource, Intent};

pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 500;

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Use the language-model fallback when no rule matches.
    #[serde(default = "default_true")]
    pub model_enabled: bool,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_enabled: true,
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_MODEL_TIMEOUT_SECS
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

/// Rule-first intent classifier with an optional model fallback.
#[derive(Clone)]
pub struct IntentClassifier {
    model: Option<Arc<dyn IntentModel>>,
    model_timeout: Duration,
    max_input_chars: usize,
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("model_timeout", &self.model_timeout)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

impl IntentClassifier {
    /// Rules only.
    pub fn rules_only() -> Self {
        Self {
            model: None,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_model(model: Arc<dyn IntentModel>, model_timeout: Duration) -> Self {
        Self {
            model: Some(model),
            model_timeout,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    /// Build from configuration. A missing API key disables the fallback
    /// rather than failing startup.
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut classifier = if config.model_enabled {
            let model = ChatCompletionsModel::api_key_from_env().and_then(|key| {
                ChatCompletionsModel::new(&config.endpoint, &config.model, key, timeout)
            });
            match model {
                Ok(model) => Self::with_model(Arc::new(model), timeout),
                Err(e) => {
                    tracing::warn!(error = %e, "Language-model fallback disabled");
                    Self::rules_only()
                }
            }
        } else {
            Self::rules_only()
        };
        classifier.max_input_chars = config.max_input_chars;
        classifier
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Classify one request. Never fails: anything inconclusive is
    /// [`Intent::unknown`].
    pub async fn classify(&self, text: &str) -> Intent {
        let text: String = text.trim().chars().take(self.max_input_chars).collect();
        if text.is_empty() {
            return Intent::unknown(ConfidenceSource::Rule);
        }

        if let Some(intent) = match_rules(&text) {
            return intent;
        }

        let Some(model) = &self.model else {
            tracing::debug!("No rule matched and no model configured");
            return Intent::unknown(ConfidenceSource::Rule);
        };

        match tokio::time::timeout(self.model_timeout, model.classify_free_text(&text)).await {
            Ok(Ok(answer)) => {
                let package = answer
                    .package_name
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty());
                match (answer.intent.trim().eq_ignore_ascii_case("install"), package) {
                    (true, Some(package)) => {
                        tracing::debug!(model = model.name(), package = %package, "Model-classified install intent");
                        let version = answer
                            .version
                            .map(|v| v.trim().to_string())
                            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"));
                        Intent::install(package, version, ConfidenceSource::Model)
                    }
                    _ => Intent::unknown(ConfidenceSource::Model),
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(model = model.name(), error = %e, "Model classification failed");
                Intent::unknown(ConfidenceSource::Model)
            }
            Err(_) => {
                tracing::warn!(
                    model = model.name(),
                    timeout_secs = self.model_timeout.as_secs(),
                    "Model classification timed out"
                );
                Intent::unknown(ConfidenceSource::Model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelIntent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_types::IntentAction;

    struct ScriptedModel {
        answer: Result<ModelIntent, String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn answering(intent: &str, package: Option<&str>) -> Self {
            Self {
                answer: Ok(ModelIntent {
                    intent: intent.to_string(),
                    package_name: package.map(str::to_string),
                    version: None,
                }),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err("boom".to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::answering("install", Some("numpy"))
            }
        }
    }

    #[async_trait]
    impl IntentModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn classify_free_text(&self, _text: &str) -> Result<ModelIntent, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer.clone().map_err(ModelError::Transport)
        }
    }

    #[tokio::test]
    async fn rules_win_without_consulting_the_model() {
        let model = Arc::new(ScriptedModel::answering("install", Some("pandas")));
        let classifier = IntentClassifier::with_model(model.clone(), Duration::from_secs(1));

        let intent = classifier.classify("Install numpy").await;
        assert_eq!(intent.package_name.as_deref(), Some("numpy"));
        assert_eq!(intent.confidence_source, ConfidenceSource::Rule);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_handles_unmatched_phrasings() {
        let model = Arc::new(ScriptedModel::answering("install", Some("polars")));
        let classifier = IntentClassifier::with_model(model.clone(), Duration::from_secs(1));

        let intent = classifier
            .classify("could the fast dataframe thing be made available")
            .await;
        assert!(intent.is_install());
        assert_eq!(intent.package_name.as_deref(), Some("polars"));
        assert_eq!(intent.confidence_source, ConfidenceSource::Model);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn model_failures_degrade_to_unknown() {
        let classifier =
            IntentClassifier::with_model(Arc::new(ScriptedModel::failing()), Duration::from_secs(1));
        let intent = classifier.classify("What is PyTorch?").await;
        assert_eq!(intent.action, IntentAction::Unknown);

        let classifier = IntentClassifier::with_model(
            Arc::new(ScriptedModel::answering("install", None)),
            Duration::from_secs(1),
        );
        assert!(!classifier.classify("what is pytorch").await.is_install());

        let classifier = IntentClassifier::with_model(
            Arc::new(ScriptedModel::answering("not_install", Some("torch"))),
            Duration::from_secs(1),
        );
        assert!(!classifier.classify("what is pytorch").await.is_install());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let classifier = IntentClassifier::with_model(
            Arc::new(ScriptedModel::slow(Duration::from_secs(60))),
            Duration::from_secs(20),
        );
        let intent = classifier.classify("tell me about dataframes").await;
        assert_eq!(intent.action, IntentAction::Unknown);
        assert_eq!(intent.confidence_source, ConfidenceSource::Model);
    }

    #[tokio::test]
    async fn input_is_capped_before_matching() {
        let classifier = IntentClassifier::rules_only();
        let padded = format!("{} install numpy", "x".repeat(600));
        assert_eq!(
            classifier.classify(&padded).await.action,
            IntentAction::Unknown
        );
        assert!(classifier.classify("   ").await.action == IntentAction::Unknown);
    }
}
