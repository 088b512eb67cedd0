//! Extension registry: registration, aliases, toggle options and the
//! deferred-initialization queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::mapping::MappingOwner;
use crate::options::{OptionChange, OptionDef, OptionScope, OptionValue, Scope};

use super::{ExtensionApi, ExtensionDescriptor};

struct ExtensionEntry {
    descriptor: ExtensionDescriptor,
    initialized: bool,
}

#[derive(Default)]
struct RegistrarState {
    entries: HashMap<String, ExtensionEntry>,
    aliases: HashMap<String, String>,
}

/// Registry of known extensions.
///
/// Lifecycle operations on one extension are serialized by a per-name
/// reentrant lock, so an option listener that fires while the same thread
/// is already enabling the extension cannot deadlock. The registry lock is
/// never held while extension code runs.
#[derive(Default)]
pub(crate) struct ExtensionRegistrar {
    state: RwLock<RegistrarState>,
    deferred: Mutex<Vec<String>>,
    name_locks: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
}

/// Toggle option name for an extension
fn option_abbrev(name: &str) -> &str {
    if name == "NERDTree" {
        "nerdtree"
    } else {
        name
    }
}

impl ExtensionRegistrar {
    fn name_lock(&self, name: &str) -> Arc<ReentrantMutex<()>> {
        self.name_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    pub fn register(&self, ctx: &EngineContext, descriptor: ExtensionDescriptor) -> bool {
        let name = descriptor.name().to_string();
        let lock = self.name_lock(&name);
        let _guard = lock.lock();

        {
            let mut state = self.state.write();
            if state.entries.contains_key(&name) {
                debug!(%name, "extension already registered");
                return false;
            }
            for alias in descriptor.aliases() {
                state.aliases.insert(alias.clone(), name.clone());
            }
            state.entries.insert(
                name.clone(),
                ExtensionEntry {
                    descriptor,
                    initialized: false,
                },
            );
        }

        let def = OptionDef::new(name.clone(), OptionScope::Global, OptionValue::Toggle(false))
            .with_abbrev(option_abbrev(&name));
        if let Err(err) = ctx.options().define(def) {
            warn!(%name, error = %err, "extension option clashes with an existing option");
            self.forget(&name);
            return false;
        }

        let weak = ctx.downgrade();
        let listener_name = name.clone();
        let listener = Arc::new(move |change: &OptionChange| {
            let Some(ctx) = EngineContext::upgrade(&weak) else {
                return;
            };
            let registrar = ctx.extensions();
            if change.new == OptionValue::Toggle(true) {
                registrar.init_or_defer(&ctx, &listener_name);
            } else {
                registrar.disable(&ctx, &listener_name);
            }
        });
        // The option was defined just above
        let _ = ctx.options().add_global_listener(&name, listener);

        info!(%name, "registered extension");
        true
    }

    pub fn unregister(&self, ctx: &EngineContext, name: &str) -> bool {
        let lock = self.name_lock(name);
        let removed = {
            let _guard = lock.lock();
            self.remove(ctx, name)
        };
        drop(lock);
        self.release_name_lock(name);
        removed
    }

    fn remove(&self, ctx: &EngineContext, name: &str) -> bool {
        let Some(entry) = self.forget(name) else {
            return false;
        };
        self.deferred.lock().retain(|n| n != name);
        if entry.initialized {
            entry.descriptor.extension().dispose();
            ctx.remove_owner(&MappingOwner::Plugin(name.to_string()));
        }
        ctx.options().undefine(name);
        info!(%name, "unregistered extension");
        true
    }

    /// Drop the lock of a name nobody is using. Clones are only taken under
    /// the map lock, so a count of one means no thread holds or awaits it.
    fn release_name_lock(&self, name: &str) {
        let mut locks = self.name_locks.lock();
        if self.state.read().entries.contains_key(name) {
            return;
        }
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    fn forget(&self, name: &str) -> Option<ExtensionEntry> {
        let mut state = self.state.write();
        let entry = state.entries.remove(name)?;
        state.aliases.retain(|_, target| target != name);
        Some(entry)
    }

    /// Initialize now, or queue until the running configuration finishes
    pub fn init_or_defer(&self, ctx: &EngineContext, name: &str) {
        if ctx.is_executing_config() {
            let mut deferred = self.deferred.lock();
            if !deferred.iter().any(|n| n == name) {
                debug!(%name, "deferring extension initialization");
                deferred.push(name.to_string());
            }
            return;
        }
        self.init(ctx, name);
    }

    fn init(&self, ctx: &EngineContext, name: &str) {
        let lock = self.name_lock(name);
        let _guard = lock.lock();

        let extension = {
            let state = self.state.read();
            match state.entries.get(name) {
                Some(entry) if !entry.initialized => entry.descriptor.extension(),
                _ => return,
            }
        };

        let mut api = ExtensionApi::new(ctx, name);
        match extension.init(&mut api) {
            Ok(()) => {
                if let Some(entry) = self.state.write().entries.get_mut(name) {
                    entry.initialized = true;
                }
                info!(%name, "initialized extension");
            }
            Err(err) => {
                let (mappings, commands) = ctx.remove_owner(&MappingOwner::Plugin(name.to_string()));
                warn!(%name, error = %err, mappings, commands, "extension failed to initialize");
            }
        }
    }

    pub fn disable(&self, ctx: &EngineContext, name: &str) {
        let lock = self.name_lock(name);
        let _guard = lock.lock();

        self.deferred.lock().retain(|n| n != name);
        let extension = {
            let mut state = self.state.write();
            match state.entries.get_mut(name) {
                Some(entry) if entry.initialized => {
                    entry.initialized = false;
                    entry.descriptor.extension()
                }
                _ => return,
            }
        };
        extension.dispose();
        ctx.remove_owner(&MappingOwner::Plugin(name.to_string()));
        info!(%name, "disabled extension");
    }

    /// Initialize everything queued while configuration ran, in order
    pub fn flush_deferred(&self, ctx: &EngineContext) {
        let queued = std::mem::take(&mut *self.deferred.lock());
        for name in queued {
            if ctx.options().is_set(&name, Scope::Global) {
                self.init(ctx, &name);
            }
        }
    }

    /// Set the toggle option of the extension known as `alias`
    pub fn activate_by_alias(&self, ctx: &EngineContext, alias: &str) -> bool {
        let name = match self.name_by_alias(alias) {
            Some(name) => name,
            None if self.is_registered(alias) => alias.to_string(),
            None => return false,
        };
        if let Err(err) = ctx
            .options()
            .set(&name, OptionValue::Toggle(true), Scope::Global)
        {
            warn!(%name, error = %err, "could not enable extension");
            return false;
        }
        true
    }

    pub fn name_by_alias(&self, alias: &str) -> Option<String> {
        self.state.read().aliases.get(alias).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.read().entries.contains_key(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.state
            .read()
            .entries
            .get(name)
            .map(|entry| entry.initialized)
            .unwrap_or(false)
    }
}
