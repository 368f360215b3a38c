//! The plugin host.
//!
//! Plugins extend the engine with codecs, filter operators, id generators,
//! and global hooks. All installation happens once at database
//! construction; a fully configured engine is immutable with respect to
//! its operator and codec registries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use folio_codec::{CodecRef, CodecRegistry};
use folio_core::config::HookSet;
use folio_core::error::{FolioError, PluginFault, Result};
use folio_core::idgen::IdGenerator;
use folio_query::{OperatorRef, OperatorRegistry};

/// A startup callback run synchronously before the database is usable.
pub type LifecycleFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// One plugin's contributions.
#[derive(Clone, Default)]
pub struct Plugin {
    /// Unique plugin name (non-empty).
    pub name: String,
    /// Optional version string, informational.
    pub version: Option<String>,
    /// Names of plugins that must be registered alongside this one.
    pub dependencies: Vec<String>,
    /// Codecs to install (later registrations may override extensions).
    pub codecs: Vec<CodecRef>,
    /// Custom filter operators.
    pub operators: Vec<OperatorRef>,
    /// Named id generators collections can opt into.
    pub id_generators: Vec<(String, Arc<dyn IdGenerator>)>,
    /// Global hooks, appended ahead of collection-local hooks.
    pub hooks: HookSet,
    /// Runs during database construction, after installation.
    pub initialize: Option<LifecycleFn>,
    /// Runs during database shutdown.
    pub shutdown: Option<LifecycleFn>,
}

impl Plugin {
    /// A named, empty plugin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn codec(mut self, codec: CodecRef) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn operator(mut self, operator: OperatorRef) -> Self {
        self.operators.push(operator);
        self
    }

    pub fn id_generator(mut self, name: impl Into<String>, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generators.push((name.into(), generator));
        self
    }

    pub fn hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn on_initialize(mut self, f: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.initialize = Some(Arc::new(f));
        self
    }

    pub fn on_shutdown(mut self, f: impl Fn() -> Result<()> + Send + Sync + 'static) -> Self {
        self.shutdown = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("codecs", &self.codecs.len())
            .field("operators", &self.operators.len())
            .field("id_generators", &self.id_generators.len())
            .finish_non_exhaustive()
    }
}

/// Everything plugin installation produces.
pub struct InstalledPlugins {
    /// The operator registry for the query pipeline.
    pub operators: OperatorRegistry,
    /// Named id generators.
    pub id_generators: HashMap<String, Arc<dyn IdGenerator>>,
    /// Global hook chains in plugin-registration order.
    pub global_hooks: HookSet,
    /// Shutdown callbacks, in registration order.
    pub shutdowns: Vec<(String, LifecycleFn)>,
}

impl fmt::Debug for InstalledPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledPlugins")
            .field("id_generators", &self.id_generators.len())
            .field("shutdowns", &self.shutdowns.len())
            .finish_non_exhaustive()
    }
}

/// Validates and installs a plugin list, in order.
///
/// Installation steps per spec: shape validation, dependency resolution,
/// operator-conflict checks, codec installation (last wins with a
/// warning), operator installation, id generator installation, hook
/// appending, then every `initialize` synchronously.
pub fn install(plugins: &[Plugin], codecs: &mut CodecRegistry) -> Result<InstalledPlugins> {
    // Shape validation first, before anything is installed.
    for plugin in plugins {
        if plugin.name.trim().is_empty() {
            return Err(FolioError::plugin(
                "<unnamed>",
                PluginFault::InvalidPluginShape,
                "plugin name must be non-empty",
            ));
        }
        for codec in &plugin.codecs {
            if codec.extensions().is_empty() {
                return Err(FolioError::plugin(
                    &plugin.name,
                    PluginFault::InvalidCodec,
                    format!("codec {:?} claims no extensions", codec.name()),
                ));
            }
        }
        for (name, _) in &plugin.id_generators {
            if name.trim().is_empty() {
                return Err(FolioError::plugin(
                    &plugin.name,
                    PluginFault::InvalidPluginShape,
                    "id generator name must be non-empty",
                ));
            }
        }
    }

    // Dependencies must resolve within the registered set.
    let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
    for plugin in plugins {
        for dependency in &plugin.dependencies {
            if !names.contains(&dependency.as_str()) {
                return Err(FolioError::plugin(
                    &plugin.name,
                    PluginFault::MissingDependencies,
                    format!("depends on unregistered plugin {dependency:?}"),
                ));
            }
        }
    }

    let mut operators = OperatorRegistry::new();
    let mut id_generators: HashMap<String, Arc<dyn IdGenerator>> = HashMap::new();
    let mut global_hooks = HookSet::new();
    let mut shutdowns = Vec::new();

    for plugin in plugins {
        for codec in &plugin.codecs {
            codecs.register(Arc::clone(codec));
        }
        for operator in &plugin.operators {
            operators.register(&plugin.name, Arc::clone(operator))?;
        }
        for (name, generator) in &plugin.id_generators {
            id_generators.insert(name.clone(), Arc::clone(generator));
        }
        global_hooks.extend(&plugin.hooks);
        if let Some(shutdown) = &plugin.shutdown {
            shutdowns.push((plugin.name.clone(), Arc::clone(shutdown)));
        }
        info!(plugin = %plugin.name, version = ?plugin.version, "installed plugin");
    }

    // Initialize synchronously, in registration order, before the
    // database becomes usable.
    for plugin in plugins {
        if let Some(initialize) = &plugin.initialize {
            initialize().map_err(|e| {
                FolioError::plugin(
                    &plugin.name,
                    PluginFault::InvalidPluginShape,
                    format!("initialize failed: {e}"),
                )
            })?;
        }
    }

    Ok(InstalledPlugins {
        operators,
        id_generators,
        global_hooks,
        shutdowns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_query::{FilterOperator, ValueType};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Noop;
    impl FilterOperator for Noop {
        fn name(&self) -> &str {
            "$noop"
        }
        fn value_types(&self) -> Vec<ValueType> {
            vec![ValueType::String]
        }
        fn evaluate(&self, _: &Value, _: &Value) -> bool {
            true
        }
    }

    #[test]
    fn install_empty_list() {
        let mut codecs = CodecRegistry::with_builtins();
        let installed = install(&[], &mut codecs).unwrap();
        assert!(installed.operators.is_empty());
        assert!(installed.id_generators.is_empty());
    }

    #[test]
    fn empty_name_rejected() {
        let mut codecs = CodecRegistry::new();
        let err = install(&[Plugin::new("")], &mut codecs).unwrap_err();
        assert_eq!(err.plugin_fault(), Some(PluginFault::InvalidPluginShape));
    }

    #[test]
    fn missing_dependency_rejected() {
        let mut codecs = CodecRegistry::new();
        let plugins = [Plugin::new("a").depends_on("missing")];
        let err = install(&plugins, &mut codecs).unwrap_err();
        assert_eq!(err.plugin_fault(), Some(PluginFault::MissingDependencies));
    }

    #[test]
    fn dependency_in_set_resolves() {
        let mut codecs = CodecRegistry::new();
        let plugins = [Plugin::new("base"), Plugin::new("extra").depends_on("base")];
        assert!(install(&plugins, &mut codecs).is_ok());
    }

    #[test]
    fn operator_conflict_across_plugins() {
        let mut codecs = CodecRegistry::new();
        let plugins = [
            Plugin::new("a").operator(Arc::new(Noop)),
            Plugin::new("b").operator(Arc::new(Noop)),
        ];
        let err = install(&plugins, &mut codecs).unwrap_err();
        assert_eq!(err.plugin_fault(), Some(PluginFault::OperatorConflict));
    }

    #[test]
    fn initialize_runs_before_usable() {
        static RAN: AtomicBool = AtomicBool::new(false);
        let mut codecs = CodecRegistry::new();
        let plugins = [Plugin::new("init").on_initialize(|| {
            RAN.store(true, Ordering::SeqCst);
            Ok(())
        })];
        install(&plugins, &mut codecs).unwrap();
        assert!(RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn initialize_failure_is_plugin_error() {
        let mut codecs = CodecRegistry::new();
        let plugins =
            [Plugin::new("boom").on_initialize(|| Err(FolioError::validation("nope")))];
        let err = install(&plugins, &mut codecs).unwrap_err();
        assert!(matches!(err, FolioError::Plugin { .. }));
    }

    #[test]
    fn hooks_append_in_registration_order() {
        use folio_core::entity::Entity;
        use serde_json::json;

        let mut first = HookSet::new();
        first.before_create.push(Arc::new(|e: &mut Entity| {
            e.insert("trail", json!(["first"]));
            Ok(())
        }));
        let mut second = HookSet::new();
        second.before_create.push(Arc::new(|e: &mut Entity| {
            if let Some(Value::Array(a)) = e.as_map_mut().get_mut("trail") {
                a.push(json!("second"));
            }
            Ok(())
        }));

        let mut codecs = CodecRegistry::new();
        let plugins = [Plugin::new("one").hooks(first), Plugin::new("two").hooks(second)];
        let installed = install(&plugins, &mut codecs).unwrap();

        let mut entity = Entity::new();
        for hook in &installed.global_hooks.before_create {
            hook(&mut entity).unwrap();
        }
        assert_eq!(entity.get("trail"), Some(&json!(["first", "second"])));
    }
}
