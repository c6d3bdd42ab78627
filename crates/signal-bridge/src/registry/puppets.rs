//! Registry of puppets (Signal users on Matrix) and double puppets.

use super::{IndexedStore, Puppet, PuppetSource};
use crate::activity::ActivityWindow;
use crate::config::{Config, USERNAME_TEMPLATE_PLACEHOLDER};
use crate::errors::BridgeError;
use crate::lifecycle::actions::Action;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Maps Signal user IDs to ghost Matrix IDs and back.
///
/// A ghost mxid is `@{prefix}{id}{suffix}:{domain}` where prefix and suffix
/// come from `bridge.username_template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostIdTemplate {
    prefix: String,
    suffix: String,
    domain: String,
}

impl GhostIdTemplate {
    /// Build from a template such as `signal_{userid}` and a server name.
    ///
    /// A template without the placeholder is treated as a pure prefix.
    #[must_use]
    pub fn new(template: &str, domain: &str) -> Self {
        let (prefix, suffix) = template
            .split_once(USERNAME_TEMPLATE_PLACEHOLDER)
            .unwrap_or((template, ""));
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            domain: domain.to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.bridge.username_template, &config.homeserver.domain)
    }

    /// Ghost mxid for a Signal user ID.
    #[must_use]
    pub fn format_mxid(&self, remote_id: &str) -> String {
        format!("@{}{remote_id}{}:{}", self.prefix, self.suffix, self.domain)
    }

    /// Signal user ID encoded in a ghost mxid, `None` if the mxid is not ours.
    #[must_use]
    pub fn parse_mxid<'a>(&self, mxid: &'a str) -> Option<&'a str> {
        let (localpart, server) = mxid.strip_prefix('@')?.split_once(':')?;
        if server != self.domain {
            return None;
        }
        let id = localpart
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        (!id.is_empty()).then_some(id)
    }
}

/// In-memory index of puppets, by ghost mxid and by double puppet mxid.
pub struct PuppetRegistry {
    source: Arc<dyn PuppetSource>,
    template: GhostIdTemplate,
    by_mxid: IndexedStore<dyn Puppet>,
    by_custom_mxid: IndexedStore<dyn Puppet>,
    initialized: AtomicBool,
}

impl PuppetRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn PuppetSource>, template: GhostIdTemplate) -> Self {
        Self {
            source,
            template,
            by_mxid: IndexedStore::new(),
            by_custom_mxid: IndexedStore::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the registry.
    ///
    /// The registry is usable for lookups as soon as this returns. Loading and
    /// starting double puppets is returned as a deferred startup action that
    /// the orchestrator runs alongside the other startup actions.
    pub fn init(self: &Arc<Self>) -> Action {
        self.initialized.store(true, Ordering::SeqCst);
        info!(target: "bridge.registry", "Puppet registry initialized");

        let registry = Arc::clone(self);
        async move { registry.start_double_puppets().await }.boxed()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn start_double_puppets(&self) -> Result<(), BridgeError> {
        let puppets = self.source.load_with_custom_mxid().await?;
        let count = puppets.len();
        let starts = puppets.into_iter().map(|puppet| async move {
            let puppet = self.register(puppet).await;
            // One broken double puppet must not block bridge startup
            if let Err(e) = puppet.start().await {
                warn!(
                    target: "bridge.registry",
                    mxid = %puppet.mxid(),
                    error = %e,
                    "Failed to start double puppet"
                );
            }
        });
        futures::future::join_all(starts).await;
        info!(target: "bridge.registry", double_puppets = count, "Double puppets started");
        Ok(())
    }

    /// Index a puppet, returning the instance that ends up registered.
    pub async fn register(&self, puppet: Arc<dyn Puppet>) -> Arc<dyn Puppet> {
        let puppet = self.by_mxid.insert(puppet.mxid().to_string(), puppet).await;
        if let Some(custom_mxid) = puppet.custom_mxid() {
            self.by_custom_mxid
                .insert(custom_mxid, Arc::clone(&puppet))
                .await;
        }
        puppet
    }

    #[must_use]
    pub fn template(&self) -> &GhostIdTemplate {
        &self.template
    }

    /// Whether `mxid` is one of this bridge's ghosts.
    #[must_use]
    pub fn is_ghost(&self, mxid: &str) -> bool {
        self.template.parse_mxid(mxid).is_some()
    }

    /// Signal user ID behind a ghost mxid.
    #[must_use]
    pub fn remote_id_from_mxid<'a>(&self, mxid: &'a str) -> Option<&'a str> {
        self.template.parse_mxid(mxid)
    }

    /// Snapshot of every cached puppet.
    pub async fn all(&self) -> Vec<Arc<dyn Puppet>> {
        self.by_mxid.values().await
    }

    /// Snapshot of every puppet with a double puppet account.
    pub async fn with_custom_mxid(&self) -> Vec<Arc<dyn Puppet>> {
        self.by_custom_mxid.values().await
    }

    /// Find a ghost by mxid, asking storage when it is not cached.
    ///
    /// Returns `None` for mxids outside the ghost namespace.
    pub async fn get_by_mxid(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Puppet>>, BridgeError> {
        if let Some(puppet) = self.by_mxid.get(mxid).await {
            return Ok(Some(puppet));
        }
        let Some(remote_id) = self.remote_id_from_mxid(mxid) else {
            return Ok(None);
        };
        match self.source.get_by_remote_id(remote_id, create).await? {
            Some(puppet) => Ok(Some(self.register(puppet).await)),
            None => Ok(None),
        }
    }

    /// Find the puppet whose double puppet account is `custom_mxid`.
    pub async fn get_by_custom_mxid(&self, custom_mxid: &str) -> Option<Arc<dyn Puppet>> {
        self.by_custom_mxid.get(custom_mxid).await
    }

    /// Activity windows of every puppet that has ever been active.
    pub async fn all_with_recorded_activity(&self) -> Result<Vec<ActivityWindow>, BridgeError> {
        let mut windows = self.source.all_with_recorded_activity().await?;
        windows.retain(ActivityWindow::has_recorded_activity);
        Ok(windows)
    }
}
