//! DNS repair for Windows hosts whose resolver cannot reach Azure endpoints.
//!
//! Wraps `netsh` and `ipconfig`. Unrelated to the Terraform flow.

use crate::shared::logging;
use crate::shared::process::{CommandRunner, ToolCommand};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const DEFAULT_PRIMARY_DNS: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
pub const DEFAULT_SECONDARY_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub admin_state: String,
    pub state: String,
    pub kind: String,
    pub name: String,
}

impl NetworkInterface {
    pub fn is_connected(&self) -> bool {
        self.state.eq_ignore_ascii_case("connected")
    }
}

/// Parse `netsh interface show interface`. Rows follow the dashed separator;
/// the name is the rest of the line and may contain spaces.
pub fn parse_interfaces(stdout: &str) -> Vec<NetworkInterface> {
    stdout
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(parse_interface_row)
        .collect()
}

fn parse_interface_row(line: &str) -> Option<NetworkInterface> {
    let mut rest = line.trim();
    let mut fields = Vec::with_capacity(3);
    for _ in 0..3 {
        let end = rest.find(char::is_whitespace)?;
        fields.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some(NetworkInterface {
        admin_state: fields[0].clone(),
        state: fields[1].clone(),
        kind: fields[2].clone(),
        name: rest.to_string(),
    })
}

pub fn parse_ipv4(value: &str) -> anyhow::Result<Ipv4Addr> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| anyhow::anyhow!("'{}' is not a valid IPv4 address", value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsAction {
    Apply {
        primary: Ipv4Addr,
        secondary: Option<Ipv4Addr>,
    },
    Reset,
}

fn netsh() -> ToolCommand {
    ToolCommand::new("netsh")
}

/// Commands for one interface, without the trailing cache flush.
pub fn interface_commands(action: DnsAction, interface: &str) -> Vec<ToolCommand> {
    let name = format!("name={}", interface);
    match action {
        DnsAction::Apply { primary, secondary } => {
            let mut commands = vec![netsh()
                .args(["interface", "ip", "set", "dns"])
                .arg(name.clone())
                .arg("static")
                .arg(primary.to_string())
                .mutating()];
            if let Some(secondary) = secondary {
                commands.push(
                    netsh()
                        .args(["interface", "ip", "add", "dns"])
                        .arg(name)
                        .arg(secondary.to_string())
                        .arg("index=2")
                        .mutating(),
                );
            }
            commands
        }
        DnsAction::Reset => vec![netsh()
            .args(["interface", "ip", "set", "dns"])
            .arg(name)
            .arg("dhcp")
            .mutating()],
    }
}

pub fn flush_command() -> ToolCommand {
    ToolCommand::new("ipconfig").arg("/flushdns").mutating()
}

pub struct DnsFixer {
    runner: Arc<dyn CommandRunner>,
    dry_run: bool,
    windows: bool,
}

impl DnsFixer {
    pub fn new(runner: Arc<dyn CommandRunner>, dry_run: bool) -> Self {
        Self {
            runner,
            dry_run,
            windows: cfg!(windows),
        }
    }

    /// Override host detection.
    pub fn with_windows(mut self, windows: bool) -> Self {
        self.windows = windows;
        self
    }

    fn ensure_windows(&self) -> anyhow::Result<()> {
        if self.windows {
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "dns-fix manages Windows network adapters through netsh and cannot run on this host"
        ))
    }

    pub async fn list(&self) -> anyhow::Result<Vec<NetworkInterface>> {
        self.ensure_windows()?;
        let cmd = netsh().args(["interface", "show", "interface"]);
        let output = self.runner.run_checked(&cmd).await?;
        Ok(parse_interfaces(&output.stdout))
    }

    /// Apply `action` to `interface`, or to every connected interface.
    /// Returns the interfaces that were changed.
    pub async fn run(&self, action: DnsAction, interface: Option<&str>) -> anyhow::Result<Vec<String>> {
        // Dry-run prints the commands on any host
        if !self.dry_run {
            self.ensure_windows()?;
        }

        let targets: Vec<String> = match interface {
            Some(name) => vec![name.to_string()],
            None => {
                if !self.windows {
                    return Err(anyhow::anyhow!(
                        "Cannot list adapters on this host; pass --interface to preview the commands"
                    ));
                }
                self.list()
                    .await?
                    .into_iter()
                    .filter(NetworkInterface::is_connected)
                    .map(|i| i.name)
                    .collect()
            }
        };
        if targets.is_empty() {
            return Err(anyhow::anyhow!("No connected network interfaces found"));
        }

        for target in &targets {
            logging::info(&format!("Updating DNS for '{}'", target));
            for cmd in interface_commands(action, target) {
                self.runner.run_checked(&cmd).await?;
            }
        }
        self.runner.run_checked(&flush_command()).await?;

        Ok(targets)
    }
}
