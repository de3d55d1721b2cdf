//! Name and alias resolution for one scope of commands.

use crate::command::Command;
use crate::error::ReplError;
use std::collections::HashMap;
use std::sync::Arc;

/// Commands of one scope, addressable by name or alias.
///
/// Registration order is kept for the `help` listing.
#[derive(Debug, Default, Clone)]
pub(crate) struct Registry {
    commands: HashMap<String, Arc<Command>>,
    order: Vec<String>,
    // name or alias -> canonical name
    names: HashMap<String, String>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Command>> {
        let canonical = self.names.get(name)?;
        self.commands.get(canonical).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Canonical commands in registration order.
    pub(crate) fn commands(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.order.iter().filter_map(|name| self.commands.get(name))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Adds `command`, rejecting any name already claimed here or in `reserved`.
    ///
    /// With `overwrite`, commands of this registry whose names collide are removed
    /// first; `reserved` names are never overwritten. Nothing is changed on error.
    pub(crate) fn insert(
        &mut self,
        command: Command,
        reserved: &Registry,
        overwrite: bool,
    ) -> Result<(), ReplError> {
        let canonical = command.name().to_string();
        let claimed: Vec<String> = std::iter::once(command.name())
            .chain(command.aliases())
            .map(str::to_string)
            .collect();
        for name in &claimed {
            let as_name = *name == canonical;
            reserved.check_free(name, as_name)?;
            if !overwrite {
                self.check_free(name, as_name)?;
            }
        }
        if overwrite {
            let owners: Vec<String> = claimed
                .iter()
                .filter_map(|name| self.names.get(name).cloned())
                .collect();
            for owner in owners {
                self.remove(&owner);
            }
        }

        for name in claimed {
            self.names.insert(name, canonical.clone());
        }
        self.order.push(canonical.clone());
        self.commands.insert(canonical, Arc::new(command));
        Ok(())
    }

    /// Makes `alias` resolve to the command `target` already registered here.
    pub(crate) fn alias(
        &mut self,
        alias: &str,
        target: &str,
        reserved: &Registry,
    ) -> Result<(), ReplError> {
        let alias = alias.to_lowercase();
        let canonical = self
            .names
            .get(&target.to_lowercase())
            .cloned()
            .ok_or_else(|| ReplError::config(format!("no command {target} to alias")))?;
        reserved.check_free(&alias, false)?;
        self.check_free(&alias, false)?;

        if let Some(command) = self.commands.get_mut(&canonical) {
            Arc::make_mut(command).add_alias(alias.clone());
        }
        self.names.insert(alias, canonical);
        Ok(())
    }

    /// Removes a command by name, or a single alias.
    ///
    /// Removing a canonical name removes all of its aliases with it.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let Some(canonical) = self.names.get(name).cloned() else {
            return false;
        };
        if canonical != name {
            self.names.remove(name);
            if let Some(command) = self.commands.get_mut(&canonical) {
                Arc::make_mut(command).remove_alias(name);
            }
            return true;
        }
        self.names.retain(|_, owner| *owner != canonical);
        self.order.retain(|n| *n != canonical);
        self.commands.remove(&canonical);
        true
    }

    pub(crate) fn clear(&mut self) {
        self.commands.clear();
        self.order.clear();
        self.names.clear();
    }

    fn check_free(&self, name: &str, as_name: bool) -> Result<(), ReplError> {
        let Some(owner) = self.names.get(name) else {
            return Ok(());
        };
        let message = if owner == name {
            format!("another command has claimed {name}")
        } else if as_name {
            format!("command {owner} has claimed {name}")
        } else {
            format!("command {owner} has claimed alias {name}")
        };
        Err(ReplError::config(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Command {
        Command::new(name, |_| async { Ok(()) })
    }

    fn insert(registry: &mut Registry, command: Command) -> Result<(), ReplError> {
        registry.insert(command, &Registry::new(), false)
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let mut registry = Registry::new();
        insert(&mut registry, noop("a").with_alias("b")).unwrap();
        assert_eq!(registry.lookup("a").unwrap().name(), "a");
        assert_eq!(registry.lookup("b").unwrap().name(), "a");
        assert!(registry.lookup("c").is_none());
    }

    #[test]
    fn test_collision_messages() {
        let mut registry = Registry::new();
        insert(&mut registry, noop("a").with_alias("b")).unwrap();

        let err = insert(&mut registry, noop("A")).unwrap_err();
        assert_eq!(err.to_string(), "another command has claimed a");

        let err = insert(&mut registry, noop("__").with_alias("B")).unwrap_err();
        assert_eq!(err.to_string(), "command a has claimed alias b");

        let err = insert(&mut registry, noop("B")).unwrap_err();
        assert_eq!(err.to_string(), "command a has claimed b");

        assert!(registry.lookup("__").is_none());
        assert_eq!(registry.names(), ["a"]);
    }

    #[test]
    fn test_reserved_names_are_checked() {
        let mut reserved = Registry::new();
        insert(&mut reserved, noop("exit").with_alias("quit")).unwrap();

        let mut registry = Registry::new();
        let err = registry
            .insert(noop("leave").with_alias("quit"), &reserved, true)
            .unwrap_err();
        assert_eq!(err.to_string(), "command exit has claimed alias quit");
    }

    #[test]
    fn test_overwrite_replaces_colliding_command() {
        let mut registry = Registry::new();
        insert(&mut registry, noop("a").with_alias("x")).unwrap();
        registry
            .insert(noop("b").with_alias("x"), &Registry::new(), true)
            .unwrap();
        assert!(registry.lookup("a").is_none());
        assert_eq!(registry.lookup("x").unwrap().name(), "b");
    }

    #[test]
    fn test_remove_name_drops_aliases() {
        let mut registry = Registry::new();
        insert(&mut registry, noop("a").with_aliases(["b", "c"])).unwrap();

        assert!(registry.remove("b"));
        assert!(registry.lookup("b").is_none());
        assert_eq!(registry.lookup("c").unwrap().aliases().collect::<Vec<_>>(), ["c"]);

        assert!(registry.remove("a"));
        assert!(!registry.contains("c"));
        assert!(!registry.remove("a"));
    }

    #[test]
    fn test_alias_existing_command() {
        let mut registry = Registry::new();
        insert(&mut registry, noop("list")).unwrap();
        registry.alias("LS", "list", &Registry::new()).unwrap();
        assert_eq!(registry.lookup("ls").unwrap().name(), "list");

        let err = registry.alias("ls", "list", &Registry::new()).unwrap_err();
        assert_eq!(err.to_string(), "command list has claimed alias ls");
        let err = registry.alias("x", "nothing", &Registry::new()).unwrap_err();
        assert_eq!(err.to_string(), "no command nothing to alias");
    }
}
