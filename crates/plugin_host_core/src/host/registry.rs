//! In-memory command and AI-tool registries.

use super::{
    CommandHandler, CommandRegistry, Disposable, HostError, HostResult, ToolDefinition,
    ToolRegistry,
};
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

struct Registered<T> {
    plugin_id: String,
    registration: Uuid,
    item: T,
}

type Table<T> = Arc<Mutex<BTreeMap<String, Registered<T>>>>;

fn lock<T>(table: &Table<T>) -> MutexGuard<'_, BTreeMap<String, Registered<T>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert<T: Send + 'static>(
    table: &Table<T>,
    plugin_id: &str,
    key: &str,
    item: T,
) -> HostResult<Disposable> {
    let registration = Uuid::new_v4();
    {
        let mut entries = lock(table);
        if entries.contains_key(key) {
            return Err(HostError::AlreadyRegistered(key.to_string()));
        }
        entries.insert(
            key.to_string(),
            Registered {
                plugin_id: plugin_id.to_string(),
                registration,
                item,
            },
        );
    }

    let table = Arc::clone(table);
    let key = key.to_string();
    Ok(Disposable::new(move || {
        let mut entries = lock(&table);
        // A later registration under the same key must survive this handle.
        if entries
            .get(&key)
            .is_some_and(|entry| entry.registration == registration)
        {
            entries.remove(&key);
        }
    }))
}

fn remove_owned_by<T>(table: &Table<T>, plugin_id: &str) -> usize {
    let mut entries = lock(table);
    let before = entries.len();
    entries.retain(|_, entry| entry.plugin_id != plugin_id);
    before - entries.len()
}

/// Command registry keeping handlers in process memory.
#[derive(Default)]
pub struct InMemoryCommandRegistry {
    commands: Table<CommandHandler>,
}

impl InMemoryCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered command ids, sorted.
    pub fn command_ids(&self) -> Vec<String> {
        lock(&self.commands).keys().cloned().collect()
    }

    /// Plugin id owning `command_id`.
    pub fn owner(&self, command_id: &str) -> Option<String> {
        lock(&self.commands)
            .get(command_id)
            .map(|entry| entry.plugin_id.clone())
    }

    /// Runs one command handler with `args`.
    pub async fn execute(&self, command_id: &str, args: Value) -> anyhow::Result<Value> {
        let handler = lock(&self.commands)
            .get(command_id)
            .map(|entry| Arc::clone(&entry.item))
            .ok_or_else(|| anyhow::anyhow!("command not found: {command_id}"))?;
        handler(args).await
    }
}

impl CommandRegistry for InMemoryCommandRegistry {
    fn register(
        &self,
        plugin_id: &str,
        command_id: &str,
        handler: CommandHandler,
    ) -> HostResult<Disposable> {
        insert(&self.commands, plugin_id, command_id, handler)
    }

    fn unregister_all(&self, plugin_id: &str) {
        let removed = remove_owned_by(&self.commands, plugin_id);
        if removed > 0 {
            debug!(
                "event=commands_revoke module=host status=ok plugin_id={} count={}",
                plugin_id, removed
            );
        }
    }
}

/// AI-tool registry keeping definitions in process memory.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    tools: Table<ToolDefinition>,
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        lock(&self.tools).keys().cloned().collect()
    }

    /// Tool names owned by `plugin_id`, sorted.
    pub fn tools_for(&self, plugin_id: &str) -> Vec<String> {
        lock(&self.tools)
            .iter()
            .filter(|(_, entry)| entry.plugin_id == plugin_id)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        lock(&self.tools).get(name).map(|entry| entry.item.clone())
    }
}

impl ToolRegistry for InMemoryToolRegistry {
    fn register(&self, plugin_id: &str, tool: ToolDefinition) -> HostResult<Disposable> {
        let name = tool.name.clone();
        insert(&self.tools, plugin_id, &name, tool)
    }

    fn unregister_all(&self, plugin_id: &str) {
        let removed = remove_owned_by(&self.tools, plugin_id);
        if removed > 0 {
            debug!(
                "event=tools_revoke module=host status=ok plugin_id={} count={}",
                plugin_id, removed
            );
        }
    }
}
