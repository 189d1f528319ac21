//! Host-facing entry points.
//!
//! `ScriptBridge` owns the loaded script instances of one plugin, keyed by
//! alias, together with the state they share: the host core, the
//! command/subscription registry, the instance manager, the audit trail and
//! the configuration.

use crate::audit::AuditTrail;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::HostCore;
use crate::instance::{ScriptInstance, resolve_script_path};
use crate::manager::InstanceManager;
use crate::registry::{Registry, SubscriptionReport};
use crate::sync::TimedMutex;
use crate::types::{CliResult, PluginId, QueryResult};
use std::collections::HashMap;
use std::path::Path;
use parking_lot::MutexGuard;
use std::sync::Arc;

/// State shared by every instance of a bridge and by the natives installed
/// into their engines.
pub struct BridgeContext {
    pub(crate) core: Arc<dyn HostCore>,
    pub(crate) registry: Registry,
    pub(crate) manager: InstanceManager,
    pub(crate) audit: AuditTrail,
    pub(crate) config: BridgeConfig,
}

impl BridgeContext {
    pub fn new(core: Arc<dyn HostCore>, config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            core,
            registry: Registry::with_timeout(config.lock_timeout()),
            manager: InstanceManager::with_timeout(config.lock_timeout()),
            audit: AuditTrail::new(config.audit_capacity),
            config,
        })
    }

    pub fn core(&self) -> &dyn HostCore {
        self.core.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn manager(&self) -> &InstanceManager {
        &self.manager
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Outcome of loading every configured script.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, BridgeError)>,
}

pub struct ScriptBridge {
    ctx: Arc<BridgeContext>,
    instances: TimedMutex<HashMap<String, Arc<ScriptInstance>>>,
}

impl ScriptBridge {
    pub fn new(core: Arc<dyn HostCore>, config: BridgeConfig) -> Self {
        let ctx = BridgeContext::new(core, config);
        let timeout = ctx.config.lock_timeout();
        let instances = TimedMutex::new(HashMap::new(), timeout, "instance table");
        Self { ctx, instances }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.ctx.audit
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }

    fn instances(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<ScriptInstance>>>> {
        self.instances.lock()
    }

    /// Resolve `script`, create an instance for it and load it.
    ///
    /// An empty `alias` defaults to the script's file stem. The instance is
    /// only kept when the load succeeds.
    pub fn load_instance(
        &self,
        plugin_id: PluginId,
        alias: &str,
        base_path: &Path,
        script: &str,
    ) -> Result<Arc<ScriptInstance>> {
        let path = resolve_script_path(base_path, script, &self.ctx.config.script_dirs)?;
        let alias = if alias.is_empty() {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| script.to_string())
        } else {
            alias.to_string()
        };
        if self.instances()?.contains_key(&alias) {
            return Err(BridgeError::InvalidState(format!(
                "a script with alias '{alias}' is already loaded"
            )));
        }

        let instance = ScriptInstance::create(self.ctx.clone(), plugin_id, &alias, base_path, path);
        instance.load()?;

        let mut instances = self.instances()?;
        if instances.contains_key(&alias) {
            drop(instances);
            instance.unload()?;
            return Err(BridgeError::InvalidState(format!(
                "a script with alias '{alias}' is already loaded"
            )));
        }
        instances.insert(alias.clone(), instance.clone());
        tracing::info!(alias = %alias, plugin_id, "script instance loaded");
        Ok(instance)
    }

    /// Unload the instance `alias` and forget it.
    pub fn unload_instance(&self, alias: &str) -> Result<()> {
        let instance = self
            .instances()?
            .remove(alias)
            .ok_or_else(|| BridgeError::InvalidState(format!("no script with alias '{alias}'")))?;
        if let Err(err) = instance.unload() {
            // Keep it addressable so the caller can retry.
            self.instances()?.insert(alias.to_string(), instance);
            return Err(err);
        }
        tracing::info!(alias, "script instance unloaded");
        Ok(())
    }

    /// Unload then load the instance `alias`.
    pub fn reload_instance(&self, alias: &str) -> Result<()> {
        let instance = self
            .instance(alias)
            .ok_or_else(|| BridgeError::InvalidState(format!("no script with alias '{alias}'")))?;
        instance.reload()?;
        tracing::info!(alias, "script instance reloaded");
        Ok(())
    }

    /// Reload every instance; failures are collected, not fatal.
    pub fn reload_all(&self) -> Vec<(String, BridgeError)> {
        let mut failures = Vec::new();
        for instance in self.snapshot() {
            if let Err(err) = instance.reload() {
                tracing::warn!(alias = instance.alias(), error = %err, "reload failed");
                failures.push((instance.alias().to_string(), err));
            }
        }
        failures
    }

    /// Unload and forget every instance.
    pub fn unload_all(&self) {
        let drained: Vec<_> = match self.instances() {
            Ok(mut instances) => instances.drain().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "unload_all skipped");
                return;
            }
        };
        unload_each(drained.into_iter());
    }

    /// Load every `[scripts]` entry of the configuration.
    pub fn load_configured(&self, plugin_id: PluginId, base_path: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        for (alias, script) in &self.ctx.config.scripts {
            match self.load_instance(plugin_id, alias, base_path, script) {
                Ok(_) => report.loaded.push(alias.clone()),
                Err(err) => {
                    tracing::error!(alias = %alias, script = %script, error = %err, "configured script failed to load");
                    report.failed.push((alias.clone(), err));
                }
            }
        }
        report
    }

    pub fn instance(&self, alias: &str) -> Option<Arc<ScriptInstance>> {
        self.instances().ok()?.get(alias).cloned()
    }

    /// Loaded aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<_> = self
            .instances()
            .map(|instances| instances.keys().cloned().collect())
            .unwrap_or_default();
        aliases.sort();
        aliases
    }

    fn snapshot(&self) -> Vec<Arc<ScriptInstance>> {
        self.instances()
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dispatch_command(&self, name: &str, args: &[String]) -> Result<QueryResult> {
        self.ctx.registry.dispatch_command(name, args)
    }

    pub fn dispatch_cli(&self, name: &str, args: &[String]) -> Result<CliResult> {
        self.ctx.registry.dispatch_cli(name, args)
    }

    pub fn dispatch_subscription(&self, channel: &str, args: &[String]) -> Result<SubscriptionReport> {
        self.ctx.registry.dispatch_subscription(channel, args)
    }
}

fn unload_each(instances: impl Iterator<Item = (String, Arc<ScriptInstance>)>) {
    for (alias, instance) in instances {
        if let Err(err) = instance.unload() {
            tracing::warn!(alias = %alias, error = %err, "unload failed");
        }
    }
}

impl Drop for ScriptBridge {
    fn drop(&mut self) {
        unload_each(self.instances.get_mut().drain());
    }
}
