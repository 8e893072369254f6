//! Subprocess driver for Terraform-class tools.

use deployit_core::TaskId;
use deployit_core::deployer::{ScriptDiagnostic, ScriptValidationResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::command::{CommandLine, ToolCommands};
use crate::workspace::Workspace;
use crate::{ExecutorError, ExecutorResult};

/// Last step of the fixed init/plan/... sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IacAction {
    Deploy,
    Destroy,
}

/// Files and values written into a fresh workspace.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInputs {
    /// Script body. Destroy runs only need the state.
    pub script: Option<String>,
    /// Rendered `version.tf`.
    pub version_constraints: String,
    /// State from the previous run.
    pub previous_state: Option<String>,
    pub variables: HashMap<String, Value>,
    /// Process environment for the tool.
    pub env: HashMap<String, String>,
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Combined stdout and stderr of every step that ran.
    pub output: String,
    pub tool_state: Option<String>,
    pub important_files: HashMap<String, String>,
}

struct StepOutput {
    success: bool,
    stdout: String,
    combined: String,
}

/// Runs one tool executable inside per-task workspaces.
#[derive(Debug, Clone)]
pub struct IacExecutor {
    program: String,
    workspace_root: PathBuf,
    tf_log: Option<String>,
}

impl IacExecutor {
    pub fn new(program: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workspace_root: workspace_root.into(),
            tf_log: None,
        }
    }

    /// Set `TF_LOG` for every invocation.
    pub fn with_tf_log(mut self, level: Option<String>) -> Self {
        self.tf_log = level;
        self
    }

    /// Run init, plan and then apply or destroy. A failing step ends the
    /// sequence and yields an unsuccessful outcome, not an error; errors are
    /// reserved for the tool not running at all.
    pub async fn execute(
        &self,
        task_id: TaskId,
        action: IacAction,
        inputs: &ExecutionInputs,
    ) -> ExecutorResult<ExecutionOutcome> {
        let ws = Workspace::create(&self.workspace_root, task_id).await?;
        let result = self.run_sequence(&ws, task_id, action, inputs).await;
        ws.remove().await;
        result
    }

    async fn run_sequence(
        &self,
        ws: &Workspace,
        task_id: TaskId,
        action: IacAction,
        inputs: &ExecutionInputs,
    ) -> ExecutorResult<ExecutionOutcome> {
        let commands = self.prepare(ws, inputs).await?;
        let last = match action {
            IacAction::Deploy => commands.apply(),
            IacAction::Destroy => commands.destroy(),
        };

        let mut output = String::new();
        let mut success = true;
        for step in [commands.init(), commands.plan(), last] {
            let result = self.run(ws, &step, &inputs.env).await;
            let step_output = match result {
                Ok(o) => o,
                Err(e) => {
                    ws.remove_variables().await;
                    return Err(e);
                }
            };
            output.push_str(&step_output.combined);
            if !step_output.success {
                error!(task_id = %task_id, command = %step, "IaC command failed");
                success = false;
                break;
            }
        }
        ws.remove_variables().await;

        let outcome = ExecutionOutcome {
            success,
            output,
            tool_state: ws.read_state().await?,
            important_files: ws.important_files().await?,
        };
        info!(
            task_id = %task_id,
            success = outcome.success,
            important_files = outcome.important_files.len(),
            "IaC execution finished"
        );
        Ok(outcome)
    }

    /// Produce the JSON plan for the inputs without applying anything.
    pub async fn plan_json(&self, task_id: TaskId, inputs: &ExecutionInputs) -> ExecutorResult<Value> {
        let ws = Workspace::create(&self.workspace_root, task_id).await?;
        let result = self.plan_json_in(&ws, inputs).await;
        ws.remove().await;
        result
    }

    async fn plan_json_in(&self, ws: &Workspace, inputs: &ExecutionInputs) -> ExecutorResult<Value> {
        let commands = self.prepare(ws, inputs).await?;
        self.run_checked(ws, &commands.init(), &inputs.env).await?;
        let planned = self
            .run_checked(ws, &commands.plan_with_output(), &inputs.env)
            .await;
        ws.remove_variables().await;
        planned?;

        let shown = self
            .run_checked(ws, &commands.show_plan_json(), &inputs.env)
            .await?;
        serde_json::from_str(shown.stdout.trim())
            .map_err(|e| ExecutorError::ParseFailed(format!("plan JSON: {e}")))
    }

    /// Check a script for syntax and internal consistency.
    pub async fn validate(
        &self,
        task_id: TaskId,
        script: &str,
        version_constraints: &str,
    ) -> ExecutorResult<ScriptValidationResult> {
        let ws = Workspace::create(&self.workspace_root, task_id).await?;
        let result = self.validate_in(&ws, script, version_constraints).await;
        ws.remove().await;
        result
    }

    async fn validate_in(
        &self,
        ws: &Workspace,
        script: &str,
        version_constraints: &str,
    ) -> ExecutorResult<ScriptValidationResult> {
        ws.write_script(script).await?;
        ws.write_version_constraints(version_constraints).await?;
        let commands = ToolCommands::new(&self.program);
        let env = HashMap::new();
        self.run_checked(ws, &commands.init(), &env).await?;

        // validate exits non-zero for invalid scripts but still prints JSON.
        let validated = self.run(ws, &commands.validate(), &env).await?;
        parse_validation(&validated.stdout)
    }

    async fn prepare(&self, ws: &Workspace, inputs: &ExecutionInputs) -> ExecutorResult<ToolCommands> {
        if let Some(script) = &inputs.script {
            ws.write_script(script).await?;
        }
        ws.write_version_constraints(&inputs.version_constraints).await?;
        if let Some(state) = &inputs.previous_state {
            ws.write_state(state).await?;
        }
        let written = ws.write_variables(&inputs.variables).await?;
        Ok(ToolCommands::new(&self.program).with_var_file(written))
    }

    async fn run_checked(
        &self,
        ws: &Workspace,
        cmd: &CommandLine,
        env: &HashMap<String, String>,
    ) -> ExecutorResult<StepOutput> {
        let output = self.run(ws, cmd, env).await?;
        if !output.success {
            return Err(ExecutorError::CommandFailed {
                command: cmd.to_string(),
                output: output.combined,
            });
        }
        Ok(output)
    }

    async fn run(
        &self,
        ws: &Workspace,
        cmd: &CommandLine,
        env: &HashMap<String, String>,
    ) -> ExecutorResult<StepOutput> {
        info!(command = %cmd, dir = %ws.path().display(), "Running IaC command");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(ws.path())
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(level) = &self.tf_log {
            command.env("TF_LOG", level);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{}\n{}", stdout, stderr);

        Ok(StepOutput {
            success: output.status.success(),
            stdout,
            combined,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawValidation {
    valid: bool,
    #[serde(default)]
    diagnostics: Vec<RawDiagnostic>,
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    severity: String,
    summary: String,
    #[serde(default)]
    detail: String,
}

/// The tool may print text before the JSON document; parse from the first `{`.
fn parse_validation(stdout: &str) -> ExecutorResult<ScriptValidationResult> {
    let start = stdout
        .find('{')
        .ok_or_else(|| ExecutorError::ParseFailed("no JSON in validate output".to_string()))?;
    let raw: RawValidation = serde_json::from_str(stdout[start..].trim())
        .map_err(|e| ExecutorError::ParseFailed(format!("validate JSON: {e}")))?;
    Ok(ScriptValidationResult {
        valid: raw.valid,
        diagnostics: raw
            .diagnostics
            .into_iter()
            .map(|d| ScriptDiagnostic {
                severity: d.severity,
                summary: d.summary,
                detail: d.detail,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validation_with_prefix() {
        let out = r#"Initializing provider plugins...
{"format_version":"1.0","valid":false,"error_count":1,"warning_count":0,
 "diagnostics":[{"severity":"error","summary":"Unsupported block type","detail":"Blocks of type \"resourc\" are not expected here."}]}"#;
        let result = parse_validation(out).unwrap();
        assert!(!result.valid);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].summary, "Unsupported block type");
    }

    #[test]
    fn test_parse_validation_without_json() {
        assert!(parse_validation("nothing here").is_err());
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A stand-in for the tool that logs its arguments and fakes the state
    /// file. `FAKE_FAIL_ON` makes the named subcommand fail.
    const FAKE_TOOL: &str = r#"#!/bin/sh
echo "$@" >> "$FAKE_LOG"
if [ -f variables.tfvars.json ]; then cp variables.tfvars.json "$FAKE_LOG.vars"; fi
if [ "$1" = "$FAKE_FAIL_ON" ]; then
  echo "Error: $1 exploded" >&2
  exit 1
fi
case "$1" in
  apply)
    echo '{"version":4,"outputs":{"ip":{"value":"10.0.0.1","type":"string"}},"resources":[]}' > terraform.tfstate
    echo 'backup' > terraform.tfstate.backup
    ;;
  destroy)
    echo '{"version":4,"outputs":{},"resources":[]}' > terraform.tfstate
    ;;
  show)
    echo '{"format_version":"1.2","resource_changes":[{"address":"a.b"}]}'
    ;;
  validate)
    echo '{"valid":true,"error_count":0,"warning_count":0,"diagnostics":[]}'
    ;;
esac
exit 0
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        tool: PathBuf,
        log: PathBuf,
        workspaces: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tofu");
        std::fs::write(&tool, FAKE_TOOL).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let workspaces = dir.path().join("workspaces");
        std::fs::create_dir(&workspaces).unwrap();
        let log = dir.path().join("calls.log");
        Fixture {
            tool,
            log,
            workspaces,
            _dir: dir,
        }
    }

    fn inputs(fx: &Fixture, fail_on: &str) -> ExecutionInputs {
        ExecutionInputs {
            script: Some("resource \"null_resource\" \"x\" {}".into()),
            version_constraints: "terraform {\n}\n".into(),
            previous_state: None,
            variables: HashMap::from([("region".to_string(), json!("RegionOne"))]),
            env: HashMap::from([
                ("FAKE_LOG".to_string(), fx.log.display().to_string()),
                ("FAKE_FAIL_ON".to_string(), fail_on.to_string()),
            ]),
        }
    }

    fn calls(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_deploy_sequence() {
        let fx = fixture();
        let executor = IacExecutor::new(fx.tool.display().to_string(), &fx.workspaces);
        let task_id = TaskId::new();

        let outcome = executor
            .execute(task_id, IacAction::Deploy, &inputs(&fx, "none"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(
            calls(&fx.log),
            vec![
                "init -no-color",
                "plan -input=false -no-color -var-file=variables.tfvars.json",
                "apply -auto-approve -input=false -no-color -var-file=variables.tfvars.json",
            ]
        );
        let vars: Value = serde_json::from_str(
            &std::fs::read_to_string(fx.log.with_extension("log.vars")).unwrap(),
        )
        .unwrap();
        assert_eq!(vars, json!({"region": "RegionOne"}));

        let state = crate::ToolState::parse(outcome.tool_state.as_deref().unwrap()).unwrap();
        assert_eq!(state.outputs["ip"], json!("10.0.0.1"));
        assert_eq!(outcome.important_files["terraform.tfstate.backup"], "backup\n");
        assert!(!fx.workspaces.join(task_id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_failed_step_stops_sequence() {
        let fx = fixture();
        let executor = IacExecutor::new(fx.tool.display().to_string(), &fx.workspaces);

        let outcome = executor
            .execute(TaskId::new(), IacAction::Deploy, &inputs(&fx, "plan"))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.output.contains("plan exploded"));
        assert_eq!(calls(&fx.log).len(), 2);
        assert!(outcome.tool_state.is_none());
    }

    #[tokio::test]
    async fn test_destroy_uses_previous_state_without_var_file() {
        let fx = fixture();
        let executor = IacExecutor::new(fx.tool.display().to_string(), &fx.workspaces);
        let mut inputs = inputs(&fx, "none");
        inputs.script = None;
        inputs.variables.clear();
        inputs.previous_state = Some(r#"{"version":4,"resources":[]}"#.into());

        let outcome = executor
            .execute(TaskId::new(), IacAction::Destroy, &inputs)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(
            calls(&fx.log)[2],
            "destroy -auto-approve -input=false -no-color"
        );
    }

    #[tokio::test]
    async fn test_plan_json_and_validate() {
        let fx = fixture();
        let executor = IacExecutor::new(fx.tool.display().to_string(), &fx.workspaces);

        let plan = executor
            .plan_json(TaskId::new(), &inputs(&fx, "none"))
            .await
            .unwrap();
        assert_eq!(plan["resource_changes"][0]["address"], json!("a.b"));
        assert_eq!(calls(&fx.log)[2], "show -json tfplan.binary");

        let validation = executor
            .validate(TaskId::new(), "resource {}", "terraform {\n}\n")
            .await
            .unwrap();
        assert!(validation.valid);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let fx = fixture();
        let executor = IacExecutor::new("/nonexistent/tofu", &fx.workspaces);
        let result = executor
            .execute(TaskId::new(), IacAction::Deploy, &inputs(&fx, "none"))
            .await;
        assert!(matches!(result, Err(ExecutorError::Io(_))));
    }
}
