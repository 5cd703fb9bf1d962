// src/commands/mod.rs
// Command registry and the builtin command set

use crate::error::{BotError, Result};
use crate::store::Store;
use crate::transport::InboundMessage;
use async_trait::async_trait;
use std::sync::Arc;

/// Execution context handed to every command.
pub struct CommandContext<'a> {
    pub store: &'a Store,
    pub message: &'a InboundMessage,
    /// Whether the sender holds admin rights (resolved by the handler).
    pub sender_is_admin: bool,
}

/// A registered command. Commands are values; `execute` returns the reply
/// text and the handler owns delivery.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Admin-gated commands reject non-admin senders before `execute`.
    fn admin_only(&self) -> bool {
        false
    }
    async fn execute(&self, ctx: &CommandContext<'_>, args: &[&str]) -> Result<String>;
}

/// Name-keyed command set, wired once at startup.
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new(commands: Vec<Arc<dyn Command>>) -> Self {
        Self { commands }
    }

    /// The builtin set.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(HelpCommand),
            Arc::new(BlockCommand),
            Arc::new(UnblockCommand),
            Arc::new(AdminCommand),
            Arc::new(PrefixCommand),
            Arc::new(EnableCommand),
            Arc::new(DisableCommand),
            Arc::new(StatsCommand),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.iter().find(|c| c.name() == name)
    }

    pub fn all(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    /// Run `name` with permission checking. The permission refusal is a
    /// reply, not an error: the conversation keeps flowing.
    pub async fn dispatch(
        &self,
        ctx: &CommandContext<'_>,
        name: &str,
        args: &[&str],
    ) -> Result<String> {
        let Some(command) = self.get(name) else {
            return Ok(format!("❓ Unknown command {name:?}. Try the help command."));
        };
        if command.admin_only() && !ctx.sender_is_admin {
            return Ok("🔒 This command requires admin permissions".to_string());
        }
        command.execute(ctx, args).await
    }
}

fn parse_user_id(args: &[&str], usage: &str) -> Result<i64> {
    let raw = args
        .first()
        .ok_or_else(|| BotError::Other(format!("usage: {usage}")))?;
    raw.parse::<i64>()
        .map_err(|_| BotError::Other(format!("{raw:?} is not a user id. usage: {usage}")))
}

// ── Builtins ──────────────────────────────────────────────────────────

struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn usage(&self) -> &'static str {
        "help"
    }
    fn description(&self) -> &'static str {
        "List available commands"
    }
    async fn execute(&self, ctx: &CommandContext<'_>, _args: &[&str]) -> Result<String> {
        let mut lines = vec!["📖 Commands:".to_string()];
        let registry = CommandRegistry::builtin();
        for command in registry.all() {
            if command.admin_only() && !ctx.sender_is_admin {
                continue;
            }
            lines.push(format!("  {} - {}", command.usage(), command.description()));
        }
        Ok(lines.join("\n"))
    }
}

struct BlockCommand;

#[async_trait]
impl Command for BlockCommand {
    fn name(&self) -> &'static str {
        "block"
    }
    fn usage(&self) -> &'static str {
        "block <user_id>"
    }
    fn description(&self) -> &'static str {
        "Drop all messages from a user"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, args: &[&str]) -> Result<String> {
        let user_id = parse_user_id(args, self.usage())?;
        ctx.store.set_blocked(user_id, true)?;
        Ok(format!("✅ User {user_id} has been blocked"))
    }
}

struct UnblockCommand;

#[async_trait]
impl Command for UnblockCommand {
    fn name(&self) -> &'static str {
        "unblock"
    }
    fn usage(&self) -> &'static str {
        "unblock <user_id>"
    }
    fn description(&self) -> &'static str {
        "Lift a user block"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, args: &[&str]) -> Result<String> {
        let user_id = parse_user_id(args, self.usage())?;
        ctx.store.set_blocked(user_id, false)?;
        Ok(format!("✅ User {user_id} has been unblocked"))
    }
}

struct AdminCommand;

#[async_trait]
impl Command for AdminCommand {
    fn name(&self) -> &'static str {
        "admin"
    }
    fn usage(&self) -> &'static str {
        "admin <user_id> <on|off>"
    }
    fn description(&self) -> &'static str {
        "Grant or revoke admin rights"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, args: &[&str]) -> Result<String> {
        let user_id = parse_user_id(args, self.usage())?;
        let grant = match args.get(1).copied() {
            Some("on") => true,
            Some("off") => false,
            _ => return Err(BotError::Other(format!("usage: {}", self.usage()))),
        };
        ctx.store.set_admin(user_id, grant)?;
        Ok(if grant {
            format!("✅ User {user_id} is now an admin")
        } else {
            format!("✅ User {user_id} is no longer an admin")
        })
    }
}

struct PrefixCommand;

#[async_trait]
impl Command for PrefixCommand {
    fn name(&self) -> &'static str {
        "prefix"
    }
    fn usage(&self) -> &'static str {
        "prefix <new_prefix>"
    }
    fn description(&self) -> &'static str {
        "Change the command prefix for this thread"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, args: &[&str]) -> Result<String> {
        let prefix = args
            .first()
            .filter(|p| !p.is_empty() && p.len() <= 4)
            .ok_or_else(|| BotError::Other(format!("usage: {}", self.usage())))?;
        ctx.store
            .set_thread_prefix(ctx.message.thread_id, prefix)?;
        Ok(format!("✅ Command prefix set to {prefix}"))
    }
}

struct EnableCommand;

#[async_trait]
impl Command for EnableCommand {
    fn name(&self) -> &'static str {
        "enable"
    }
    fn usage(&self) -> &'static str {
        "enable"
    }
    fn description(&self) -> &'static str {
        "Enable replies in this thread"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, _args: &[&str]) -> Result<String> {
        ctx.store.set_thread_enabled(ctx.message.thread_id, true)?;
        Ok("✅ Bot enabled in this thread".to_string())
    }
}

struct DisableCommand;

#[async_trait]
impl Command for DisableCommand {
    fn name(&self) -> &'static str {
        "disable"
    }
    fn usage(&self) -> &'static str {
        "disable"
    }
    fn description(&self) -> &'static str {
        "Silence replies in this thread"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &CommandContext<'_>, _args: &[&str]) -> Result<String> {
        ctx.store.set_thread_enabled(ctx.message.thread_id, false)?;
        Ok("✅ Bot disabled in this thread".to_string())
    }
}

struct StatsCommand;

#[async_trait]
impl Command for StatsCommand {
    fn name(&self) -> &'static str {
        "stats"
    }
    fn usage(&self) -> &'static str {
        "stats"
    }
    fn description(&self) -> &'static str {
        "Show store counters"
    }
    async fn execute(&self, ctx: &CommandContext<'_>, _args: &[&str]) -> Result<String> {
        let stats = ctx.store.stats()?;
        Ok(format!(
            "📊 messages: {} | threads: {} | users: {}",
            stats.messages, stats.threads, stats.users
        ))
    }
}
