//! Command lines for Terraform-class tools.
//!
//! Strings must be reproducible byte for byte: flags are emitted in a fixed
//! order separated by single spaces, and `-var-file` is appended only when a
//! variables file was written for the task.

use std::fmt;

pub const VARIABLES_FILE: &str = "variables.tfvars.json";
pub const PLAN_FILE: &str = "tfplan.binary";

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds the command lines for one tool executable.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    program: String,
    var_file: bool,
}

impl ToolCommands {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            var_file: false,
        }
    }

    /// Whether a variables file was written into the workspace.
    pub fn with_var_file(mut self, written: bool) -> Self {
        self.var_file = written;
        self
    }

    pub fn init(&self) -> CommandLine {
        self.build(&["init", "-no-color"], false)
    }

    pub fn plan(&self) -> CommandLine {
        self.build(&["plan", "-input=false", "-no-color"], true)
    }

    pub fn plan_with_output(&self) -> CommandLine {
        self.build(
            &["plan", "-input=false", "-no-color", "--out", PLAN_FILE],
            true,
        )
    }

    pub fn apply(&self) -> CommandLine {
        self.build(&["apply", "-auto-approve", "-input=false", "-no-color"], true)
    }

    pub fn destroy(&self) -> CommandLine {
        self.build(&["destroy", "-auto-approve", "-input=false", "-no-color"], true)
    }

    pub fn show_plan_json(&self) -> CommandLine {
        self.build(&["show", "-json", PLAN_FILE], false)
    }

    pub fn validate(&self) -> CommandLine {
        self.build(&["validate", "-json", "-no-color"], false)
    }

    fn build(&self, args: &[&str], takes_var_file: bool) -> CommandLine {
        let mut args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if takes_var_file && self.var_file {
            args.push(format!("-var-file={VARIABLES_FILE}"));
        }
        CommandLine {
            program: self.program.clone(),
            args,
        }
    }
}
