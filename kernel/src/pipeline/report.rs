//! Parsing of executor output into change summaries and resource state.

use serde_json::Value;

use crate::domain::{AppliedResource, ChangeSummary};

/// Counts `resource_changes` actions of a `show -json` plan document.
///
/// Returns `None` when the document has no `resource_changes` array.
#[must_use]
pub fn summarize_plan(plan: &Value) -> Option<ChangeSummary> {
    let changes = plan.get("resource_changes")?.as_array()?;
    let mut summary = ChangeSummary::default();
    for change in changes {
        let actions: Vec<&str> = change
            .pointer("/change/actions")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        match actions.as_slice() {
            ["create"] => summary.add += 1,
            ["update"] => summary.change += 1,
            ["delete"] => summary.destroy += 1,
            ["delete", "create"] | ["create", "delete"] => {
                summary.add += 1;
                summary.destroy += 1;
            }
            _ => {}
        }
    }
    Some(summary)
}

/// Extracts counts from the human-readable plan output.
///
/// Recognizes `Plan: N to add, M to change, K to destroy.` and
/// `No changes.`.
#[must_use]
pub fn summary_from_log<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<ChangeSummary> {
    let mut found = None;
    for line in lines {
        let line = line.trim();
        if line.starts_with("No changes.") {
            found = Some(ChangeSummary::default());
        } else if let Some(rest) = line.strip_prefix("Plan:") {
            found = parse_counts(rest).or(found);
        }
    }
    found
}

fn parse_counts(text: &str) -> Option<ChangeSummary> {
    let mut summary = ChangeSummary::default();
    let mut seen = false;
    for part in text.trim_end_matches('.').split(',') {
        let mut words = part.split_whitespace();
        let count: u32 = words.next()?.parse().ok()?;
        if words.next() != Some("to") {
            return None;
        }
        match words.next()? {
            "add" => summary.add = count,
            "change" => summary.change = count,
            "destroy" => summary.destroy = count,
            "import" | "forget" => {}
            _ => return None,
        }
        seen = true;
    }
    seen.then_some(summary)
}

/// Managed resources recorded in a `show -json` state document, including
/// those of nested modules.
#[must_use]
pub fn state_resources(state: &Value) -> Vec<AppliedResource> {
    let mut resources = Vec::new();
    if let Some(root) = state.pointer("/values/root_module") {
        collect(root, &mut resources);
    }
    resources
}

fn collect(module: &Value, out: &mut Vec<AppliedResource>) {
    for resource in module
        .get("resources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if resource.get("mode").and_then(Value::as_str) == Some("data") {
            continue;
        }
        let text = |key: &str| {
            resource
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let address = text("address");
        if address.is_empty() {
            continue;
        }
        out.push(AppliedResource {
            address,
            resource_type: text("type"),
            name: text("name"),
            attributes: resource.get("values").cloned().unwrap_or(Value::Null),
        });
    }
    for child in module
        .get("child_modules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        collect(child, out);
    }
}
