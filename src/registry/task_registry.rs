//! # Task Registry
//!
//! Maps task-type names to their handler and immutable [`TaskConfig`].
//! Registration is explicit, through [`TaskRegistry::register`] or a
//! [`TaskRegistryBuilder`] populated at startup; there is no global registry.

use super::handler::TaskHandler;
use crate::config::{ConfigurationError, QueuesConfig, TaskConfig};
use crate::error::{TaskerError, TaskerResult};
use crate::logging;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A resolved task type
#[derive(Clone)]
pub struct RegisteredTask {
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub config: Arc<TaskConfig>,
}

impl fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    pub total_tasks: usize,
    pub pinned_tasks: usize,
    pub rate_limited_tasks: usize,
}

pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, RegisteredTask>>,
    queues: QueuesConfig,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_names", &self.task_names())
            .field("queues", &self.queues)
            .finish()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(QueuesConfig::default())
    }
}

impl TaskRegistry {
    /// Empty registry accepting queue pins to the given lanes
    pub fn new(queues: QueuesConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            queues,
        }
    }

    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Register a task type; fails with `AlreadyRegistered` if the name is taken
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        config: TaskConfig,
    ) -> TaskerResult<()> {
        self.insert(name.into(), handler, config, false)
    }

    /// Register a task type, replacing any existing registration
    pub fn register_or_replace(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        config: TaskConfig,
    ) -> TaskerResult<()> {
        self.insert(name.into(), handler, config, true)
    }

    fn insert(
        &self,
        name: String,
        handler: Arc<dyn TaskHandler>,
        config: TaskConfig,
        overwrite: bool,
    ) -> TaskerResult<()> {
        self.validate_registration(&name, &config)?;

        let mut tasks = self.tasks.write();
        if !overwrite && tasks.contains_key(&name) {
            return Err(TaskerError::AlreadyRegistered { name });
        }

        let replaced = tasks.contains_key(&name);
        debug!(
            task_name = %name,
            max_retries = config.max_retries,
            queue_name = ?config.queue_name,
            rate_limit = ?config.rate_limit,
            "Registering task type"
        );
        logging::log_registry_operation(
            "register",
            Some(&name),
            if replaced { "replaced" } else { "registered" },
            None,
        );

        let entry = RegisteredTask {
            name: name.clone(),
            handler,
            config: Arc::new(config),
        };
        tasks.insert(name, entry);
        Ok(())
    }

    fn validate_registration(&self, name: &str, config: &TaskConfig) -> TaskerResult<()> {
        if name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "name",
                name,
                "task name must not be empty",
            )
            .into());
        }

        config.validate()?;

        if let Some(queue_name) = &config.queue_name {
            if !self.queues.contains(queue_name) {
                return Err(ConfigurationError::invalid_value(
                    "queue_name",
                    queue_name,
                    format!(
                        "must be one of the configured queues ({})",
                        self.queues.in_priority_order().join(", ")
                    ),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Look up a task type; fails with `NotRegistered` if absent
    pub fn resolve(&self, name: &str) -> TaskerResult<RegisteredTask> {
        let tasks = self.tasks.read();
        match tasks.get(name) {
            Some(entry) => Ok(entry.clone()),
            None => {
                debug!(task_name = name, "Task type not registered");
                Err(TaskerError::NotRegistered {
                    name: name.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tasks.write().remove(name).is_some()
    }

    /// Registered names, sorted
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn queues(&self) -> &QueuesConfig {
        &self.queues
    }

    pub fn stats(&self) -> RegistryStats {
        let tasks = self.tasks.read();
        RegistryStats {
            total_tasks: tasks.len(),
            pinned_tasks: tasks
                .values()
                .filter(|t| t.config.queue_name.is_some())
                .count(),
            rate_limited_tasks: tasks
                .values()
                .filter(|t| t.config.rate_limit.is_some())
                .count(),
        }
    }
}

/// Collects `(name, handler, config)` registrations before the service starts
#[derive(Default)]
pub struct TaskRegistryBuilder {
    entries: Vec<(String, Arc<dyn TaskHandler>, TaskConfig)>,
    queues: Option<QueuesConfig>,
}

impl TaskRegistryBuilder {
    pub fn queues(mut self, queues: QueuesConfig) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn task(
        mut self,
        name: impl Into<String>,
        handler: impl TaskHandler,
        config: TaskConfig,
    ) -> Self {
        self.entries.push((name.into(), Arc::new(handler), config));
        self
    }

    /// Build the registry, failing on the first invalid or duplicate entry
    pub fn build(self) -> TaskerResult<TaskRegistry> {
        let registry = TaskRegistry::new(self.queues.unwrap_or_default());
        for (name, handler, config) in self.entries {
            registry.register(name, handler, config)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;
    use serde_json::{json, Value};

    fn echo_handler() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_ctx, args: Vec<Value>, _kwargs| async move {
            Ok(Value::Array(args))
        }))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = TaskRegistry::default();
        registry
            .register("echo", echo_handler(), TaskConfig::default())
            .unwrap();

        let entry = registry.resolve("echo").unwrap();
        assert_eq!(entry.name, "echo");
        assert_eq!(entry.config.max_retries, 3);
        assert!(registry.contains("echo"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = TaskRegistry::default();
        registry
            .register("echo", echo_handler(), TaskConfig::default())
            .unwrap();

        let result = registry.register("echo", echo_handler(), TaskConfig::default());
        assert_eq!(
            result,
            Err(TaskerError::AlreadyRegistered {
                name: "echo".to_string()
            })
        );
    }

    #[test]
    fn test_explicit_overwrite() {
        let registry = TaskRegistry::default();
        registry
            .register("echo", echo_handler(), TaskConfig::default())
            .unwrap();
        let config = TaskConfig {
            max_retries: 0,
            ..Default::default()
        };
        registry
            .register_or_replace("echo", echo_handler(), config)
            .unwrap();

        assert_eq!(registry.resolve("echo").unwrap().config.max_retries, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = TaskRegistry::default();
        assert!(matches!(
            registry.resolve("missing"),
            Err(TaskerError::NotRegistered { name }) if name == "missing"
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let registry = TaskRegistry::default();
        let bad_queue = TaskConfig {
            queue_name: Some("reports".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            registry.register("report", echo_handler(), bad_queue),
            Err(TaskerError::Configuration(_))
        ));

        let bad_rate = TaskConfig {
            rate_limit: Some("fast".to_string()),
            ..Default::default()
        };
        assert!(registry.register("report", echo_handler(), bad_rate).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_builder_collects_registrations() {
        let registry = TaskRegistry::builder()
            .task(
                "add",
                handler_fn(|_ctx, args: Vec<Value>, _kwargs| async move {
                    let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                    Ok(json!(sum))
                }),
                TaskConfig::default(),
            )
            .task(
                "pinned",
                handler_fn(|_ctx, _args, _kwargs| async move { Ok(Value::Null) }),
                TaskConfig {
                    queue_name: Some("high".to_string()),
                    rate_limit: Some("10/s".to_string()),
                    ..Default::default()
                },
            )
            .build()
            .unwrap();

        assert_eq!(registry.task_names(), vec!["add", "pinned"]);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                total_tasks: 2,
                pinned_tasks: 1,
                rate_limited_tasks: 1,
            }
        );
    }

    #[test]
    fn test_builder_fails_on_duplicate() {
        let result = TaskRegistry::builder()
            .task("a", handler_fn(|_c, _a, _k| async { Ok(Value::Null) }), TaskConfig::default())
            .task("a", handler_fn(|_c, _a, _k| async { Ok(Value::Null) }), TaskConfig::default())
            .build();
        assert!(matches!(result, Err(TaskerError::AlreadyRegistered { .. })));
    }
}
