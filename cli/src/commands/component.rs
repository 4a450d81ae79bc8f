//! Component commands.

use anyhow::{bail, Context as _, Result};
use clap::{Args, Subcommand};
use serde_json::Value;
use stackforge_kernel::domain::{ComponentId, ModuleVersionId, Variables};
use stackforge_kernel::repository::{ComponentChanges, NewComponent};

use crate::cli::Context;
use crate::output::print_output;

/// Component management.
#[derive(Subcommand)]
pub enum ComponentCommand {
    /// Add a component to a changeset.
    Create(CreateArgs),
    /// Change the module version or variables of a component.
    Update(UpdateArgs),
    /// List components of a changeset, or of trunk when omitted.
    List(ListArgs),
    /// Show the last applied state of a component.
    State(StateArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Changeset name.
    pub changeset: String,
    /// Component name, unique per branch.
    #[arg(long)]
    pub name: String,
    /// Module version to instantiate.
    #[arg(long)]
    pub module_version: i64,
    /// Module input as `key=value`. Values are parsed as JSON when possible.
    #[arg(long = "var", value_parser = parse_variable)]
    pub vars: Vec<(String, Value)>,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Changeset name.
    pub changeset: String,
    /// Component id.
    pub id: i64,
    /// New module version.
    #[arg(long)]
    pub module_version: Option<i64>,
    /// Replacement module input as `key=value`. Replaces all variables.
    #[arg(long = "var", value_parser = parse_variable)]
    pub vars: Vec<(String, Value)>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Changeset name. Lists trunk when omitted.
    #[arg(long)]
    pub changeset: Option<String>,
}

#[derive(Args)]
pub struct StateArgs {
    /// Component id.
    pub id: i64,
    /// Changeset name. Reads trunk when omitted.
    #[arg(long)]
    pub changeset: Option<String>,
}

impl ComponentCommand {
    /// Execute the component command.
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = &ctx.client;
        match self {
            Self::Create(args) => {
                let component = NewComponent {
                    module_version_id: ModuleVersionId::new(args.module_version),
                    name: args.name,
                    variables: collect(args.vars),
                };
                print_output(&client.create_component(&args.changeset, &component).await?, ctx.json);
            }
            Self::Update(args) => {
                if args.module_version.is_none() && args.vars.is_empty() {
                    bail!("nothing to update: pass --module-version or --var");
                }
                let changes = ComponentChanges {
                    module_version_id: args.module_version.map(ModuleVersionId::new),
                    variables: (!args.vars.is_empty()).then(|| collect(args.vars)),
                };
                let component = client
                    .update_component(&args.changeset, ComponentId::new(args.id), &changes)
                    .await?;
                print_output(&component, ctx.json);
            }
            Self::List(args) => {
                print_output(&client.list_components(args.changeset.as_deref()).await?, ctx.json);
            }
            Self::State(args) => {
                let state = client
                    .component_state(args.changeset.as_deref(), ComponentId::new(args.id))
                    .await?;
                print_output(&state, ctx.json);
            }
        }
        Ok(())
    }
}

fn collect(vars: Vec<(String, Value)>) -> Variables {
    vars.into_iter().collect()
}

/// Parses `key=value`, falling back to a JSON string when `value` is not
/// valid JSON.
fn parse_variable(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected key=value, got {raw}"))?;
    if key.is_empty() {
        bail!("variable name is empty in {raw}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variables_parse_as_json_or_string() {
        assert_eq!(parse_variable("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(
            parse_variable("tags={\"env\":\"dev\"}").unwrap(),
            ("tags".into(), json!({ "env": "dev" }))
        );
        assert_eq!(
            parse_variable("cidr=10.0.0.0/16").unwrap(),
            ("cidr".into(), json!("10.0.0.0/16"))
        );
        assert_eq!(parse_variable("empty=").unwrap(), ("empty".into(), json!("")));
    }

    #[test]
    fn malformed_variables_are_rejected() {
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=1").is_err());
    }
}
