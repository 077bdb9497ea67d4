//! Output formatting utilities for the CLI
//!
//! Tables for sessions, configs and cluster resources, the status
//! display, and colored one-line messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use kf_core::Configuration;

use crate::ipc::{
    CommandOutcome, CommandStatus, ConfigState, NamespaceResources, OrchestratorStatus,
    SessionInfo,
};

/// Format per-config command outcomes as a table
pub fn format_results(results: &[CommandStatus]) -> String {
    if results.is_empty() {
        return "Nothing to do".to_string();
    }

    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "CONFIG")]
        config_id: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let rows: Vec<ResultRow> = results
        .iter()
        .map(|r| ResultRow {
            config_id: r.config_id.to_string(),
            status: r.status.to_string(),
            address: r.local_address.clone().unwrap_or_else(|| "-".to_string()),
            detail: r
                .error
                .clone()
                .or_else(|| r.warning.clone())
                .unwrap_or_default(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format registered sessions as a table
pub fn format_sessions(sessions: &[SessionInfo]) -> String {
    if sessions.is_empty() {
        return "No active forwards".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "CONFIG")]
        config_id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "MODE")]
        mode: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "RECONNECTS")]
        reconnects: u32,
        #[tabled(rename = "PROXY POD")]
        proxy: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            config_id: s.config_id.to_string(),
            name: truncate(&s.name, 24),
            state: s.state.to_string(),
            mode: s.mode.clone(),
            local: format!("{}/{}", s.local_address, s.protocol),
            reconnects: s.reconnects,
            proxy: s.proxy_pod.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format stored configurations with their running flags
pub fn format_configs(configs: &[Configuration], states: &[ConfigState]) -> String {
    if configs.is_empty() {
        return "No configurations stored".to_string();
    }

    #[derive(Tabled)]
    struct ConfigRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "CONTEXT")]
        context: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PORTS")]
        ports: String,
        #[tabled(rename = "RUNNING")]
        running: String,
    }

    let rows: Vec<ConfigRow> = configs
        .iter()
        .map(|c| {
            let running = states
                .iter()
                .any(|s| s.config_id == c.id && s.is_running);
            ConfigRow {
                id: c.id.to_string(),
                name: truncate(c.display_name(), 24),
                context: c.context.clone().unwrap_or_else(|| "-".to_string()),
                target: format!(
                    "{}/{}/{} ({})",
                    c.namespace, c.workload_type, c.target, c.protocol
                ),
                ports: format!("{} -> {}", c.local_port, c.remote_port),
                running: if running { "yes" } else { "no" }.to_string(),
            }
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format cluster resources, one table per namespace
pub fn format_resources(namespaces: &[NamespaceResources]) -> String {
    if namespaces.iter().all(|ns| ns.resources.is_empty()) {
        return "No kftray resources found".to_string();
    }

    #[derive(Tabled)]
    struct ResourceRow {
        #[tabled(rename = "TYPE")]
        kind: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "CONFIG")]
        config_id: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "AGE")]
        age: String,
        #[tabled(rename = "ORPHANED")]
        orphaned: String,
    }

    let mut output = String::new();
    for ns in namespaces.iter().filter(|ns| !ns.resources.is_empty()) {
        let rows: Vec<ResourceRow> = ns
            .resources
            .iter()
            .map(|r| ResourceRow {
                kind: r.resource_type.clone(),
                name: r.name.clone(),
                config_id: r
                    .config_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status: r.status.clone(),
                age: r.age.clone(),
                orphaned: if r.is_orphaned { "yes" } else { "no" }.to_string(),
            })
            .collect();

        output.push_str(&format!("Namespace: {}\n", ns.namespace));
        output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        output.push('\n');
    }
    output
}

/// Format orchestrator status as a human-readable string
pub fn format_status(status: &OrchestratorStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Orchestrator Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Uptime: {}\n", format_duration(status.uptime_secs)));
    output.push_str(&format!("IPC Address: {}\n", status.ipc_address));
    output.push_str(&format!(
        "Network: {}\n",
        if status.network_healthy { "online" } else { "offline" }
    ));
    output.push_str(&format!("Active Forwards: {}\n", status.session_count));

    output
}

/// Print each outcome with a colored prefix; returns how many failed
pub fn print_results(results: &[CommandStatus]) -> usize {
    let mut failed = 0;
    for r in results {
        match (r.status, &r.error, &r.warning) {
            (CommandOutcome::Failed, error, _) => {
                failed += 1;
                print_error(&format!(
                    "Config {}: {}",
                    r.config_id,
                    error.as_deref().unwrap_or("failed")
                ));
            }
            (_, _, Some(warning)) => {
                print_warning(&format!("Config {} {}: {}", r.config_id, r.status, warning));
            }
            (CommandOutcome::Running, _, _) => print_success(&format!(
                "Config {} forwarding on {}",
                r.config_id,
                r.local_address.as_deref().unwrap_or("?")
            )),
            (CommandOutcome::Stopped, _, _) => {
                print_success(&format!("Config {} stopped", r.config_id))
            }
        }
    }
    failed
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
