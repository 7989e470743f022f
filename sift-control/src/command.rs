//! The fixed set of control commands and prefix resolution over them.

use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Password,
    Quit,
    Reload,
    Stat,
    Shutdown,
    Uptime,
    Learn,
    Help,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    /// Requires a successful `password` first
    pub privileged: bool,
    pub kind: CommandKind,
}

impl Command {
    const fn new(name: &'static str, privileged: bool, kind: CommandKind) -> Self {
        Self {
            name,
            privileged,
            kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    None,
    Unique(&'a Command),
    Ambiguous,
}

#[derive(Debug)]
pub struct Registry {
    commands: Vec<Command>,
}

/// The commands every control session understands
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new(vec![
        Command::new("password", false, CommandKind::Password),
        Command::new("quit", false, CommandKind::Quit),
        Command::new("reload", true, CommandKind::Reload),
        Command::new("stat", false, CommandKind::Stat),
        Command::new("shutdown", true, CommandKind::Shutdown),
        Command::new("uptime", false, CommandKind::Uptime),
        Command::new("learn", true, CommandKind::Learn),
        Command::new("help", false, CommandKind::Help),
    ])
});

impl Registry {
    pub const fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Resolve a (possibly abbreviated) command name
    ///
    /// Matching is case-sensitive; a full name is also a prefix of itself.
    pub fn resolve(&self, prefix: &str) -> Resolution<'_> {
        let mut matches = self
            .commands
            .iter()
            .filter(|command| command.name.starts_with(prefix));

        match (matches.next(), matches.next()) {
            (None, _) => Resolution::None,
            (Some(command), None) => Resolution::Unique(command),
            (Some(_), Some(_)) => Resolution::Ambiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(prefix: &str) -> Option<CommandKind> {
        match REGISTRY.resolve(prefix) {
            Resolution::Unique(command) => Some(command.kind),
            _ => None,
        }
    }

    #[test]
    fn full_names_resolve() {
        for command in REGISTRY.commands() {
            assert_eq!(resolved(command.name), Some(command.kind));
        }
    }

    #[test]
    fn abbreviations() {
        assert_eq!(resolved("pass"), Some(CommandKind::Password));
        assert_eq!(resolved("q"), Some(CommandKind::Quit));
        assert_eq!(resolved("up"), Some(CommandKind::Uptime));
        assert_eq!(resolved("sta"), Some(CommandKind::Stat));
        assert_eq!(resolved("sh"), Some(CommandKind::Shutdown));
    }

    #[test]
    fn ambiguous_and_unknown() {
        assert_eq!(REGISTRY.resolve("s"), Resolution::Ambiguous);
        assert_eq!(REGISTRY.resolve("stats"), Resolution::None);
        assert_eq!(REGISTRY.resolve("HELP"), Resolution::None);
        assert_eq!(REGISTRY.resolve("x"), Resolution::None);
    }

    #[test]
    fn privileged_commands() {
        let privileged = REGISTRY
            .commands()
            .iter()
            .filter(|command| command.privileged)
            .map(|command| command.name)
            .collect::<Vec<_>>();

        assert_eq!(privileged, ["reload", "shutdown", "learn"]);
    }
}
