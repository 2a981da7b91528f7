use keel_core::KeelConfig;

use crate::plan::{BuildPlan, Phase};

/// Renders a [`BuildPlan`] and the runtime settings as a Dockerfile.
pub struct DockerfileGenerator<'a> {
    config: &'a KeelConfig,
    plan: &'a BuildPlan,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(config: &'a KeelConfig, plan: &'a BuildPlan) -> Self {
        Self { config, plan }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Generated by keel. Run `keel eject` to customize.\n");
        out.push_str(&format!("FROM {}\n", self.plan.base_image()));

        for (phase, heading) in [
            (Phase::Install, "# === Install phase: toolchain and dependencies ==="),
            (Phase::Stage, "# === Stage phase: application files and data directory ==="),
        ] {
            out.push('\n');
            out.push_str(heading);
            out.push('\n');
            for step in self.plan.phase_steps(phase) {
                out.push_str(&step.instruction());
                out.push('\n');
            }
        }

        out.push_str("\n# === Runtime ===\n");
        for (key, value) in self.config.runtime.flag_vars() {
            out.push_str(&format!("ENV {key}={value}\n"));
        }
        for (key, value) in &self.config.build.env {
            out.push_str(&format!("ENV {key}={}\n", quote_env(value)));
        }
        if let Some(port) = self.config.runtime.port {
            out.push_str(&format!("EXPOSE {port}\n"));
        }
        out.push_str(&format!(
            "CMD {}\n",
            exec_form(&self.config.runtime.entrypoint)
        ));

        out
    }
}

/// JSON array form, so the entrypoint runs as PID 1 without a shell.
fn exec_form(args: &[String]) -> String {
    let quoted: Vec<String> = args.iter().map(|a| json_string(a)).collect();
    format!("[{}]", quoted.join(", "))
}

/// A JSON string literal, which is also a valid Dockerfile quoted string.
fn json_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// ENV value, double-quoted unless it is plainly safe.
///
/// Docker expands `$` and honors `\` escapes inside double quotes, so `"`,
/// `\` and `$` are backslash-escaped to keep the value literal.
fn quote_env(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | ','))
    {
        return value.to_owned();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
