//! Human-readable output using `colored`.

use colored::{ColoredString, Colorize};

use crate::core::engine::EngineStatus;
use crate::core::health::HealthReport;
use crate::core::models::{ModelDescriptor, ModelStatus, Route};
use crate::core::orchestrator::CompletionOutcome;

/// Apply `paint` unless color is disabled.
fn styled(text: &str, no_color: bool, paint: impl Fn(&str) -> ColoredString) -> String {
    if no_color {
        text.to_string()
    } else {
        paint(text).to_string()
    }
}

fn status_color(status: ModelStatus, no_color: bool) -> String {
    let label = status.label();
    match status {
        ModelStatus::Loaded => styled(label, no_color, |s| s.green().bold()),
        ModelStatus::Loading | ModelStatus::Unloading => styled(label, no_color, |s| s.yellow()),
        ModelStatus::Error => styled(label, no_color, |s| s.red()),
        ModelStatus::Available | ModelStatus::Unknown => styled(label, no_color, |s| s.dimmed()),
    }
}

fn format_size(size_gb: f64) -> String {
    if size_gb > 0.0 {
        format!("{size_gb:.1} GB")
    } else {
        "-".to_string()
    }
}

/// Model table, local models first.
#[must_use]
pub fn render_models(models: &[ModelDescriptor], no_color: bool) -> String {
    if models.is_empty() {
        return format!(
            "{}\n",
            styled("No models discovered.", no_color, |s| s.yellow())
        );
    }

    let width = models.iter().map(|m| m.id.len()).max().unwrap_or(8).max(8);
    let mut output = String::new();
    output.push_str(&format!(
        "{}\n",
        styled(
            &format!("{:<width$}  {:<16}  {:<10}  {:>8}  {:>8}  {}", "MODEL", "KIND", "STATUS", "SIZE", "CONTEXT", "VISION"),
            no_color,
            |s| s.bold()
        )
    ));

    let mut sorted: Vec<&ModelDescriptor> = models.iter().collect();
    sorted.sort_by(|a, b| b.is_local().cmp(&a.is_local()).then_with(|| a.id.cmp(&b.id)));

    for model in sorted {
        // Pad before coloring so escape codes don't break alignment.
        let status = format!("{:<10}", model.status.label());
        let status = status.replacen(model.status.label(), &status_color(model.status, no_color), 1);
        output.push_str(&format!(
            "{:<width$}  {:<16}  {}  {:>8}  {:>8}  {}\n",
            model.id,
            model.kind.label(),
            status,
            format_size(model.size_gb),
            model.context_window,
            if model.supports_vision { "yes" } else { "" },
        ));
    }
    output
}

#[must_use]
pub fn render_health(reports: &[HealthReport], no_color: bool) -> String {
    let mut output = String::new();
    for report in reports {
        let mark = if report.reachable {
            styled("up", no_color, |s| s.green().bold())
        } else {
            styled("down", no_color, |s| s.red().bold())
        };
        output.push_str(&format!(
            "{:<16} {:<6} {:>6} ms  {}\n",
            report.backend.name(),
            mark,
            report.latency_ms,
            styled(&report.detail, no_color, |s| s.dimmed()),
        ));
    }
    output
}

#[must_use]
pub fn render_route(route: &Route, no_color: bool) -> String {
    format!(
        "{} {} {}\n",
        styled(&route.model_id, no_color, |s| s.bold()),
        styled("via", no_color, |s| s.dimmed()),
        styled(route.backend.name(), no_color, |s| s.cyan()),
    )
}

/// The answer text, plus the attempt trail when `trace` is set.
#[must_use]
pub fn render_outcome(outcome: &CompletionOutcome, trace: bool, no_color: bool) -> String {
    let mut output = String::new();
    if outcome.success {
        output.push_str(&outcome.text);
    } else {
        output.push_str(&styled(&outcome.text, no_color, |s| s.yellow()));
    }
    output.push('\n');

    if trace {
        output.push('\n');
        for (i, attempt) in outcome.attempts.iter().enumerate() {
            let result = attempt.classified_error.map_or_else(
                || styled("ok", no_color, |s| s.green()),
                |kind| styled(kind.code(), no_color, |s| s.red()),
            );
            output.push_str(&format!(
                "{} {:<18} {:<16} {} {}\n",
                styled(&format!("#{}", i + 1), no_color, |s| s.dimmed()),
                attempt.stage.label(),
                attempt.backend.name(),
                attempt.model_id,
                result,
            ));
        }
        if let Some(usage) = outcome.usage {
            output.push_str(&format!(
                "{}\n",
                styled(
                    &format!(
                        "tokens: {} prompt + {} completion = {}",
                        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                    ),
                    no_color,
                    |s| s.dimmed()
                )
            ));
        }
    }
    output
}

#[must_use]
pub fn render_status(status: &EngineStatus, no_color: bool) -> String {
    let label = |s: &str| styled(&format!("{s:<18}"), no_color, |t| t.bold());
    let mut output = String::new();

    output.push_str(&format!(
        "{}{}\n",
        label("Model override"),
        status.configured_model.as_deref().unwrap_or("auto")
    ));
    match &status.active_model {
        Some(active) => output.push_str(&format!(
            "{}{} (idle {}s)\n",
            label("Active local"),
            styled(&active.model_id, no_color, |s| s.green()),
            active.idle_secs
        )),
        None => output.push_str(&format!(
            "{}{}\n",
            label("Active local"),
            styled("none", no_color, |s| s.dimmed())
        )),
    }
    output.push_str(&format!("{}{}\n", label("Cloud tier"), status.tier.active_tier.label()));
    output.push_str(&format!("{}{}\n", label("Tier switches"), status.tier.switch_count));
    output.push_str(&format!(
        "{}{} ({})\n",
        label("Last recovery"),
        status.tier.last_recovery_action,
        status.tier.last_provider_status
    ));
    if let Some(code) = &status.tier.last_error_code {
        output.push_str(&format!("{}{}\n", label("Last error"), styled(code, no_color, |s| s.red())));
    }
    let memory = status.total_memory_gb.map_or_else(
        || format!("{:.1} GB available", status.available_memory_gb),
        |total| format!("{:.1} / {total:.1} GB available", status.available_memory_gb),
    );
    output.push_str(&format!("{}{memory}\n", label("Memory")));
    output.push_str(&format!("{}{}\n", label("Catalog"), status.catalog_size));
    output
}

/// One-line result of a lifecycle command.
#[must_use]
pub fn render_lifecycle(action: &str, model: &str, ok: bool, no_color: bool) -> String {
    if ok {
        format!("{} {model}\n", styled(action, no_color, |s| s.green().bold()))
    } else {
        format!(
            "{} {model}\n",
            styled(&format!("{action} failed:"), no_color, |s| s.red().bold())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Backend, CloudProvider, ModelKind, Tier, TierState};
    use crate::core::orchestrator::{RecoveryAttempt, RecoveryStage};
    use crate::core::semantic::SemanticErrorKind;

    #[test]
    fn models_table_lists_local_first() {
        let models = vec![
            ModelDescriptor::new("gemini-2.0-flash", ModelKind::CloudPrimary),
            ModelDescriptor::new("qwen2.5-7b-instruct", ModelKind::LocalText).with_size_gb(4.4),
        ];
        let output = render_models(&models, true);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("MODEL"));
        assert!(lines[1].starts_with("qwen2.5-7b-instruct"));
        assert!(lines[1].contains("4.4 GB"));
        assert!(lines[2].starts_with("gemini-2.0-flash"));
    }

    #[test]
    fn empty_models_message() {
        assert!(render_models(&[], true).contains("No models discovered"));
    }

    #[test]
    fn outcome_trace_lists_attempts() {
        let outcome = CompletionOutcome {
            text: "hello".into(),
            success: true,
            route: Some(Route::cloud("m", CloudProvider::Primary)),
            error: None,
            usage: None,
            attempts: vec![
                RecoveryAttempt {
                    stage: RecoveryStage::Initial,
                    model_id: "m".into(),
                    backend: Backend::Cloud(CloudProvider::Primary),
                    result_text: "quota".into(),
                    classified_error: Some(SemanticErrorKind::QuotaExceeded),
                },
                RecoveryAttempt {
                    stage: RecoveryStage::TierSwitch,
                    model_id: "m".into(),
                    backend: Backend::Cloud(CloudProvider::Primary),
                    result_text: "hello".into(),
                    classified_error: None,
                },
            ],
        };
        let output = render_outcome(&outcome, true, true);
        assert!(output.starts_with("hello\n"));
        assert!(output.contains("switch_to_paid"));
        assert!(output.contains(SemanticErrorKind::QuotaExceeded.code()));

        let plain = render_outcome(&outcome, false, true);
        assert_eq!(plain, "hello\n");
    }

    #[test]
    fn status_shows_tier() {
        let status = EngineStatus {
            configured_model: None,
            active_model: None,
            tier: TierState::new(Tier::Paid),
            available_memory_gb: 12.0,
            total_memory_gb: Some(32.0),
            catalog_size: 3,
        };
        let output = render_status(&status, true);
        assert!(output.contains("paid"));
        assert!(output.contains("12.0 / 32.0 GB"));
        assert!(output.contains("none"));
    }
}
