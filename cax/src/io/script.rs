//! `run.sh` export of the planned command sequence.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::command::PlannedCommand;
use crate::plan::Plan;

const RUN_SCRIPT_TEMPLATE: &str = include_str!("templates/run.sh.j2");

#[derive(Debug, Serialize)]
struct ScriptLine<'a> {
    display_name: &'a str,
    line: String,
}

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("run.sh", RUN_SCRIPT_TEMPLATE)
        .context("load run script template")?;
    Ok(env)
}

/// Bash script running `commands` in order, stopping at the first failure.
pub fn render_run_script(plan: &Plan, commands: &[PlannedCommand]) -> Result<String> {
    let env = engine()?;
    let lines: Vec<ScriptLine<'_>> = commands
        .iter()
        .map(|command| ScriptLine {
            display_name: &command.display_name,
            line: command.shell_preview(),
        })
        .collect();
    let generated_by = match plan.header.generated_by.as_str() {
        "" => "cactus-prepare",
        other => other,
    };
    let rendered = env
        .get_template("run.sh")?
        .render(context! { generated_by => generated_by, commands => lines })
        .context("render run script")?;
    Ok(format!("{}\n", rendered.trim_end()))
}

/// Write the script and mark it executable.
pub fn write_run_script(path: &Path, script: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, script).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}
