//! Output formatting for CLI responses.
//!
//! Every response prints either as a short human summary or as pretty JSON
//! for scripts.

use serde::Serialize;
use stackforge_kernel::catalog::ComponentState;
use stackforge_kernel::domain::{
    Apply, Changeset, Component, Merge, Module, ModuleVersion, Plan, Rebase,
};
use stackforge_kernel::integration::RebaseReport;

/// Types that can be printed in both formats.
pub trait Outputable: Serialize {
    /// Human-readable rendering.
    fn to_human(&self) -> String;
}

/// Print a value in the selected format.
pub fn print_output<T: Outputable + ?Sized>(value: &T, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value)
                .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize: {e}\"}}"))
        );
    } else {
        println!("{}", value.to_human());
    }
}

/// Print free-form text such as task logs. JSON mode wraps it.
pub fn print_text(text: &str, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "output": text }));
    } else {
        print!("{text}");
    }
}

impl<T: Outputable> Outputable for Vec<T> {
    fn to_human(&self) -> String {
        if self.is_empty() {
            return "(none)".to_string();
        }
        self.iter().map(Outputable::to_human).collect::<Vec<_>>().join("\n")
    }
}

impl Outputable for serde_json::Value {
    fn to_human(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Outputable for Changeset {
    fn to_human(&self) -> String {
        format!(
            "{:<24} {:<9} {:<18} {}",
            self.name, self.state, self.review_state, self.updated_at
        )
    }
}

impl Outputable for Component {
    fn to_human(&self) -> String {
        format!(
            "{:<8} {:<24} module-version {}",
            self.id, self.name, self.module_version_id
        )
    }
}

impl Outputable for ComponentState {
    fn to_human(&self) -> String {
        let mut out = format!(
            "version {} serial {}",
            self.state.version.as_deref().unwrap_or("-"),
            self.state.serial
        );
        for resource in &self.resources {
            out.push_str("\n  ");
            out.push_str(&resource.address);
        }
        out
    }
}

impl Outputable for Plan {
    fn to_human(&self) -> String {
        let summary = self.summary.map_or_else(
            || "-".to_string(),
            |s| format!("+{} ~{} -{}", s.add, s.change, s.destroy),
        );
        format!(
            "{:<8} {:<10} component {} {} -> {} {}",
            self.id,
            self.state,
            self.component_id,
            self.from_version.as_deref().unwrap_or("none"),
            self.to_version.as_deref().unwrap_or("none"),
            summary
        )
    }
}

impl Outputable for Apply {
    fn to_human(&self) -> String {
        format!("{:<8} {:<10} {}", self.id, self.state, self.plan_id)
    }
}

impl Outputable for Merge {
    fn to_human(&self) -> String {
        task_line(&self.id, self.state, self.error.as_deref())
    }
}

impl Outputable for Rebase {
    fn to_human(&self) -> String {
        task_line(&self.id, self.state, self.error.as_deref())
    }
}

impl Outputable for RebaseReport {
    fn to_human(&self) -> String {
        if self.up_to_date {
            return "already up to date".to_string();
        }
        let id = self
            .id
            .map_or_else(|| "rebase".to_string(), |id| id.to_string());
        task_line(&id, self.state, self.error.as_deref())
    }
}

impl Outputable for Module {
    fn to_human(&self) -> String {
        format!("{:<8} {:<24} {}", self.id, self.name, self.source)
    }
}

impl Outputable for ModuleVersion {
    fn to_human(&self) -> String {
        format!("{:<8} {} {}", self.id, self.module_id, self.version)
    }
}

fn task_line(id: &dyn std::fmt::Display, state: impl std::fmt::Display, error: Option<&str>) -> String {
    match error {
        Some(reason) => format!("{id:<8} {state:<10} {reason}"),
        None => format!("{id:<8} {state}"),
    }
}
