//! Terminal rendering

use warden_ledger::{RequestStatistics, TransitionEntry};
use warden_policy::RoleSummary;
use warden_types::{InstallationRequest, Intent, ResultKind, WorkflowResult};

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_result(result: &WorkflowResult) {
    let marker = match result.kind {
        ResultKind::InstallationSuccess => "ok",
        ResultKind::NotInstall => "--",
        ResultKind::PermissionDenied => "denied",
        ResultKind::ValidationFailed | ResultKind::InstallationFailed => "failed",
    };
    println!("[{}] {}", marker, result.message);

    if let Some(id) = &result.request_id {
        println!("  request:  {}", id);
    }
    if let Some(status) = result.status {
        println!("  status:   {}", status);
    }
    if result.kind == ResultKind::InstallationSuccess {
        println!("  verified: {}", if result.verified { "yes" } else { "no" });
    }
    if !result.allowed_packages.is_empty() {
        println!("  you may install: {}", result.allowed_packages.join(", "));
    }
    if !result.raw_output.trim().is_empty() {
        println!();
        println!("{}", result.raw_output.trim_end());
    }
}

pub fn print_transitions(entries: &[TransitionEntry]) {
    if entries.is_empty() {
        return;
    }
    println!();
    println!("{:<4} {:<18} {:<20} DETAIL", "SEQ", "STAGE", "STATUS");
    for entry in entries {
        println!(
            "{:<4} {:<18} {:<20} {}",
            entry.sequence,
            entry.stage.as_str(),
            entry.status.map(|s| s.as_str()).unwrap_or("-"),
            entry.detail
        );
    }
}

pub fn print_roles(summaries: &[RoleSummary]) {
    for summary in summaries {
        let indent = "  ".repeat(summary.depth);
        println!(
            "{}{} ({}) - {} packages",
            indent, summary.name, summary.role, summary.total_packages
        );
        if !summary.direct_packages.is_empty() {
            println!("{}  direct: {}", indent, summary.direct_packages.join(", "));
        }
    }
}

pub fn print_intent(intent: &Intent) {
    if intent.is_install() {
        println!(
            "install {} (version: {}, via {:?})",
            intent.package_name.as_deref().unwrap_or_default(),
            intent.version.as_deref().unwrap_or("latest"),
            intent.confidence_source
        );
    } else {
        println!("not an installation request (via {:?})", intent.confidence_source);
    }
}

pub fn print_history(records: &[InstallationRequest]) {
    if records.is_empty() {
        println!("No requests recorded");
        return;
    }
    println!(
        "{:<20} {:<12} {:<24} {:<20} {:<10} CREATED",
        "STATUS", "REQUESTER", "PACKAGE", "VERSION", "VERIFIED"
    );
    for record in records {
        println!(
            "{:<20} {:<12} {:<24} {:<20} {:<10} {}",
            record.status.as_str(),
            record.requester,
            record.package_name,
            record
                .installed_version
                .as_deref()
                .or(record.requested_version.as_deref())
                .unwrap_or("latest"),
            if record.verified { "yes" } else { "no" },
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &record.error_detail {
            println!("    {}", error);
        }
    }
}

pub fn print_statistics(stats: &RequestStatistics) {
    println!();
    println!(
        "{} requests: {} completed, {} denied, {} failed, {} in progress ({:.0}% success)",
        stats.total,
        stats.completed,
        stats.denied,
        stats.failed,
        stats.in_progress,
        stats.success_rate * 100.0
    );
}
