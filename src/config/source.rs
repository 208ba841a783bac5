//! Per-source configuration schema and runner construction.
//!
//! ```yaml
//! sources:
//!   - id: crime_watch
//!     kind: rss
//!     url: https://sheriff.example/feed
//!     identity: { fields: [link] }
//!     max_items: 10
//!     transforms:
//!       - keyword: { keywords: [grand junction, fruita, palisade] }
//!       - image: { base_url: https://sheriff.example }
//!     sinks:
//!       - discord: { webhook: "env:CRIME_WEBHOOK", username: Crime Watch }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::json_api::BasicAuth;
use crate::adapters::{
    DiscordSink, Generator, JsonApiSource, OpenAiGenerator, RssSource, Sink, SourceAdapter,
    TelegramSink,
};
use crate::core::dedup_store::is_valid_source_id;
use crate::core::{
    BackoffPolicy, DedupStore, Dispatcher, PollInterval, Retention, RetryPolicy, SourceRunner,
    SourceSettings,
};
use crate::domain::{IdentityScheme, Normalizer};
use crate::transform::{
    ArticleTransform, GenerationFailurePolicy, ImageSelector, KeywordFilter, TransformPipeline,
};

const DEFAULT_USER_AGENT: &str = concat!("feedwatch/", env!("CARGO_PKG_VERSION"));

/// Resolve a credential: `env:NAME` reads the environment, anything else is literal
pub fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => {
            let var = var.trim();
            std::env::var(var)
                .with_context(|| format!("Environment variable '{}' is not set", var))
        }
        None => Ok(value.to_string()),
    }
}

/// Values every source inherits unless it sets its own
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDefaults {
    pub interval_secs: Option<u64>,
    pub jitter_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub delivery_timeout_secs: Option<u64>,
    pub spacing_ms: Option<u64>,
    pub max_items: Option<usize>,
    pub oldest_first: Option<bool>,
    pub mark_seen_on_drop: Option<bool>,
    pub retry: Option<RetryPolicy>,
    pub backoff: Option<BackoffPolicy>,
    pub retention: Option<Retention>,
    pub user_agent: Option<String>,
}

/// How a source is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// One `sources:` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub url: String,

    /// Identity scheme; defaults to `link` for RSS and `id` for JSON
    #[serde(default)]
    pub identity: Option<IdentityScheme>,

    /// JSON only: pointer to the item array
    #[serde(default)]
    pub items_pointer: Option<String>,

    /// JSON only: pointer applied to each element
    #[serde(default)]
    pub item_pointer: Option<String>,

    #[serde(default)]
    pub auth: Option<BasicAuthConfig>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub transforms: Vec<TransformConfig>,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    /// Per-source overrides of `defaults:`
    #[serde(flatten)]
    pub overrides: SourceDefaults,
}

/// One entry of a source's `transforms:` list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    Keyword {
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Image {
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        require: bool,
    },
    Article {
        generator: String,
        #[serde(default)]
        on_failure: GenerationFailurePolicy,
        #[serde(default)]
        instruction: Option<String>,
    },
}

/// One entry of a source's `sinks:` list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    Discord {
        #[serde(default)]
        name: Option<String>,
        webhook: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        color: Option<u32>,
    },
    Telegram {
        #[serde(default)]
        name: Option<String>,
        bot_token: String,
        chat_id: String,
        #[serde(default)]
        api_base: Option<String>,
    },
}

/// A `generators:` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Source values after merging `defaults:` and built-in defaults
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub settings: SourceSettings,
    pub retry: RetryPolicy,
    pub delivery_timeout: Duration,
    pub retention: Retention,
    pub user_agent: String,
}

impl SourceConfig {
    /// Merge this source's overrides over the shared defaults
    pub fn effective(&self, defaults: &SourceDefaults) -> EffectiveSettings {
        let o = &self.overrides;
        let base = SourceSettings::default();

        let interval = Duration::from_secs(
            o.interval_secs
                .or(defaults.interval_secs)
                .unwrap_or(base.interval.base.as_secs()),
        );
        let jitter = Duration::from_secs(o.jitter_secs.or(defaults.jitter_secs).unwrap_or(0));

        EffectiveSettings {
            settings: SourceSettings {
                max_items: o.max_items.or(defaults.max_items),
                oldest_first: o
                    .oldest_first
                    .or(defaults.oldest_first)
                    .unwrap_or(base.oldest_first),
                spacing: Duration::from_millis(
                    o.spacing_ms
                        .or(defaults.spacing_ms)
                        .unwrap_or(base.spacing.as_millis() as u64),
                ),
                fetch_timeout: o
                    .fetch_timeout_secs
                    .or(defaults.fetch_timeout_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(base.fetch_timeout),
                mark_seen_on_drop: o
                    .mark_seen_on_drop
                    .or(defaults.mark_seen_on_drop)
                    .unwrap_or(base.mark_seen_on_drop),
                interval: PollInterval::jittered(interval, jitter),
                backoff: o
                    .backoff
                    .clone()
                    .or_else(|| defaults.backoff.clone())
                    .unwrap_or(base.backoff),
            },
            retry: o
                .retry
                .clone()
                .or_else(|| defaults.retry.clone())
                .unwrap_or_default(),
            delivery_timeout: Duration::from_secs(
                o.delivery_timeout_secs
                    .or(defaults.delivery_timeout_secs)
                    .unwrap_or(10),
            ),
            retention: o
                .retention
                .clone()
                .or_else(|| defaults.retention.clone())
                .unwrap_or_default(),
            user_agent: o
                .user_agent
                .clone()
                .or_else(|| defaults.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    /// Identity scheme, falling back to the kind's natural key
    pub fn identity_scheme(&self) -> IdentityScheme {
        self.identity.clone().unwrap_or_else(|| match self.kind {
            SourceKind::Rss => IdentityScheme::field("link"),
            SourceKind::Json => IdentityScheme::field("id"),
        })
    }

    /// Check everything that does not need secrets or the network
    pub fn validate(&self, generators: &HashMap<String, GeneratorConfig>) -> Result<()> {
        if !is_valid_source_id(&self.id) {
            bail!(
                "Source id '{}' must be non-empty and use only letters, digits, '-', '_' or '.'",
                self.id
            );
        }
        if self.url.trim().is_empty() {
            bail!("Source '{}' has an empty url", self.id);
        }
        if self.sinks.is_empty() {
            bail!("Source '{}' has no sinks", self.id);
        }
        if self.identity_scheme().fields.is_empty() {
            bail!("Source '{}' has an identity scheme with no fields", self.id);
        }
        if self.kind == SourceKind::Rss && (self.items_pointer.is_some() || self.item_pointer.is_some()) {
            bail!("Source '{}': items_pointer/item_pointer only apply to json sources", self.id);
        }
        for transform in &self.transforms {
            if let TransformConfig::Article { generator, .. } = transform {
                if !generators.contains_key(generator) {
                    bail!(
                        "Source '{}' references unknown generator '{}'",
                        self.id,
                        generator
                    );
                }
            }
        }
        Ok(())
    }

    fn build_adapter(&self, client: reqwest::Client) -> Result<Arc<dyn SourceAdapter>> {
        let url = resolve_secret(&self.url)?;
        Ok(match self.kind {
            SourceKind::Rss => Arc::new(RssSource::new(&self.id, url, client)),
            SourceKind::Json => {
                let mut source = JsonApiSource::new(&self.id, url, client)
                    .with_items_pointer(self.items_pointer.clone().unwrap_or_default());
                if let Some(pointer) = &self.item_pointer {
                    source = source.with_item_pointer(pointer);
                }
                if let Some(auth) = &self.auth {
                    source = source.with_basic_auth(BasicAuth {
                        username: resolve_secret(&auth.username)?,
                        password: resolve_secret(&auth.password)?,
                    });
                }
                for (name, value) in &self.headers {
                    source = source.with_header(name, resolve_secret(value)?);
                }
                Arc::new(source)
            }
        })
    }

    fn build_sinks(
        &self,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Vec<Arc<dyn Sink>>> {
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        for (i, sink) in self.sinks.iter().enumerate() {
            match sink {
                SinkConfig::Discord {
                    name,
                    webhook,
                    username,
                    avatar_url,
                    color,
                } => {
                    let name = name.clone().unwrap_or_else(|| format!("discord#{}", i + 1));
                    let webhook = resolve_secret(webhook)
                        .with_context(|| format!("Source '{}' sink '{}'", self.id, name))?;
                    let mut discord = DiscordSink::new(name, webhook, client.clone())
                        .with_timeout(timeout);
                    if let Some(username) = username {
                        discord = discord.with_username(username);
                    }
                    if let Some(avatar) = avatar_url {
                        discord = discord.with_avatar(avatar);
                    }
                    if let Some(color) = color {
                        discord = discord.with_color(*color);
                    }
                    sinks.push(Arc::new(discord));
                }
                SinkConfig::Telegram {
                    name,
                    bot_token,
                    chat_id,
                    api_base,
                } => {
                    let name = name.clone().unwrap_or_else(|| format!("telegram#{}", i + 1));
                    let token = resolve_secret(bot_token)
                        .with_context(|| format!("Source '{}' sink '{}'", self.id, name))?;
                    let mut telegram =
                        TelegramSink::new(name, token, resolve_secret(chat_id)?, client.clone())
                            .with_timeout(timeout);
                    if let Some(base) = api_base {
                        telegram = telegram.with_api_base(base);
                    }
                    sinks.push(Arc::new(telegram));
                }
            }
        }
        Ok(sinks)
    }

    fn build_transforms(
        &self,
        generators: &HashMap<String, Arc<dyn Generator>>,
    ) -> Result<TransformPipeline> {
        let mut pipeline = TransformPipeline::new();
        for transform in &self.transforms {
            match transform {
                TransformConfig::Keyword { keywords, tags } => {
                    pipeline.push(Arc::new(KeywordFilter::new(keywords).with_tags(tags)));
                }
                TransformConfig::Image { base_url, require } => {
                    pipeline.push(Arc::new(
                        ImageSelector::new(base_url.clone()).require_image(*require),
                    ));
                }
                TransformConfig::Article {
                    generator,
                    on_failure,
                    instruction,
                } => {
                    let backend = generators.get(generator).cloned().with_context(|| {
                        format!("Source '{}' references unknown generator '{}'", self.id, generator)
                    })?;
                    let mut article = ArticleTransform::new(backend).on_failure(*on_failure);
                    if let Some(instruction) = instruction {
                        article = article.with_instruction(instruction);
                    }
                    pipeline.push(Arc::new(article));
                }
            }
        }
        Ok(pipeline)
    }

    /// Build a runner for this source and apply its retention to the store
    pub async fn build_runner(
        &self,
        defaults: &SourceDefaults,
        generators: &HashMap<String, Arc<dyn Generator>>,
        store: Arc<DedupStore>,
    ) -> Result<SourceRunner> {
        let effective = self.effective(defaults);
        let client = reqwest::Client::builder()
            .user_agent(effective.user_agent.clone())
            .timeout(effective.settings.fetch_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let adapter = self.build_adapter(client.clone())?;
        let sinks = self.build_sinks(&client, effective.delivery_timeout)?;
        let transforms = self.build_transforms(generators)?;
        let normalizer = Normalizer::new(&self.id, self.identity_scheme());
        let dispatcher = Dispatcher::new(sinks, effective.retry, effective.delivery_timeout);

        store
            .configure_source(&self.id, effective.retention)
            .await
            .with_context(|| format!("Failed to apply retention for '{}'", self.id))?;

        Ok(SourceRunner::new(adapter, normalizer, dispatcher, store)
            .with_transforms(transforms)
            .with_settings(effective.settings))
    }
}

impl GeneratorConfig {
    pub fn build(&self) -> Result<Arc<dyn Generator>> {
        let timeout = Duration::from_secs(self.timeout_secs.unwrap_or(60));
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let mut generator = OpenAiGenerator::new(resolve_secret(&self.api_key)?, &self.model, client)
            .with_timeout(timeout);
        if let Some(endpoint) = &self.endpoint {
            generator = generator.with_endpoint(endpoint);
        }
        if let Some(prompt) = &self.system_prompt {
            generator = generator.with_system_prompt(prompt);
        }
        if let Some(max_tokens) = self.max_tokens {
            generator = generator.with_max_tokens(max_tokens);
        }
        Ok(Arc::new(generator))
    }
}

/// Reject duplicate source ids
pub fn check_unique_ids(sources: &[SourceConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source.id.as_str()) {
            bail!("Duplicate source id '{}'", source.id);
        }
    }
    Ok(())
}
