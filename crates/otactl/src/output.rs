//! Terminal rendering for status and list, ASCII only.

use ota_shared::status::{AppStatus, ListEntry, StatusReport};
use ota_shared::Outcome;
use owo_colors::OwoColorize;

pub fn print_status(report: &StatusReport) {
    print!("{}", render_status(report));
}

pub fn print_list(entries: &[ListEntry]) {
    print!("{}", render_list(entries));
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Tag:      {}\n", report.tag));
    out.push_str(&format!(
        "Current:  {} (#{})\n",
        report.current_name.bold(),
        report.current_id
    ));
    out.push_str(&format!("Image:    {}\n", report.image_hash));

    if !report.apps.is_empty() {
        out.push_str("Apps:\n");
        for app in &report.apps {
            out.push_str(&render_app(app));
        }
    }

    match &report.pending {
        Some(pending) => {
            let kind = if pending.is_rollback { "rollback" } else { "install" };
            out.push_str(&format!(
                "Pending:  {} of {} (#{}) in {}\n",
                kind,
                pending.version_name,
                pending.version_id,
                pending.phase.yellow()
            ));
            out.push_str(&format!("          {}\n", pending.reason));
        }
        None => out.push_str("Pending:  none\n"),
    }

    if report.reboot_required {
        out.push_str(&format!("{}\n", "[REBOOT REQUIRED]".bright_red()));
    }
    if !report.failed_versions.is_empty() {
        let ids: Vec<String> = report.failed_versions.iter().map(|id| format!("#{}", id)).collect();
        out.push_str(&format!("Failed:   {}\n", ids.join(", ")));
    }
    if let Some(receipt) = &report.last_finalize {
        out.push_str(&format!(
            "Last run: #{} -> {}\n",
            receipt.version_id,
            outcome_label(receipt.outcome)
        ));
    }
    out
}

pub fn render_list(entries: &[ListEntry]) -> String {
    if entries.is_empty() {
        return "No versions published for this tag\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let mut flags = Vec::new();
        if entry.current {
            flags.push("current".green().to_string());
        }
        if entry.selected {
            flags.push("selected".cyan().to_string());
        }
        if entry.failed {
            flags.push("failed".bright_red().to_string());
        }
        out.push_str(&format!(
            "#{:<6} {:<24} {} {}\n",
            entry.id,
            entry.name,
            short_hash(&entry.image_hash),
            flags.join(" ")
        ));
        if let Some(reason) = &entry.reason {
            out.push_str(&format!("        {}\n", reason));
        }
        for app in &entry.apps {
            out.push_str(&render_app(app));
        }
    }
    out
}

fn render_app(app: &AppStatus) -> String {
    let marker = if app.on { "on " } else { "off" };
    let running = match app.running {
        Some(true) => " running",
        Some(false) => " stopped",
        None => "",
    };
    format!(
        "    [{}] {} {}{}\n",
        marker,
        app.name,
        short_hash(&app.digest),
        running
    )
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Outcome line for stderr
pub fn outcome_label(outcome: Outcome) -> String {
    if outcome.is_success() {
        format!("[OK] {}", outcome).green().to_string()
    } else {
        format!("[{}] {}", outcome.code(), outcome).yellow().to_string()
    }
}
