//! Invocation builder
//!
//! Maps merged [`ExecutionOptions`] onto the external tool's flag list.
//! The result is deterministic for a given executable and options.

use agentrun_foundation::ExecutionOptions;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Flags that put the tool in non-interactive streaming mode
pub const STREAM_FLAGS: [&str; 4] = ["-p", "--output-format", "stream-json", "--verbose"];

/// Fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Build from defaults and per-call overrides
    pub fn build(
        executable: &str,
        defaults: &ExecutionOptions,
        overrides: &ExecutionOptions,
    ) -> Self {
        Self::from_options(executable, &defaults.merged_with(overrides))
    }

    /// Build from already merged options
    pub fn from_options(executable: &str, options: &ExecutionOptions) -> Self {
        let mut args: Vec<String> = STREAM_FLAGS.iter().map(|s| s.to_string()).collect();

        if let Some(model) = &options.model {
            push_pair(&mut args, "--model", model);
        }
        if let Some(mode) = &options.permission_mode {
            push_pair(&mut args, "--permission-mode", mode);
        }
        for dir in &options.add_dirs {
            push_pair(&mut args, "--add-dir", &dir.to_string_lossy());
        }
        if !options.allowed_tools.is_empty() {
            push_pair(&mut args, "--allowedTools", &options.allowed_tools.join(","));
        }
        if !options.disallowed_tools.is_empty() {
            push_pair(
                &mut args,
                "--disallowedTools",
                &options.disallowed_tools.join(","),
            );
        }
        if let Some(prompt) = &options.system_prompt {
            push_pair(&mut args, "--system-prompt", prompt);
        }
        if let Some(prompt) = &options.append_system_prompt {
            push_pair(&mut args, "--append-system-prompt", prompt);
        }
        if let Some(turns) = options.max_turns {
            push_pair(&mut args, "--max-turns", &turns.to_string());
        }
        if options.dangerously_skip_permissions == Some(true) {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(config) = &options.mcp_config {
            push_pair(&mut args, "--mcp-config", &config.to_string_lossy());
        }

        args.extend(options.extra_args.iter().cloned());

        Self {
            program: executable.to_string(),
            args,
            working_dir: options.working_dir.clone(),
            env: options.env.clone(),
        }
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
