//! `packrat build` command implementation.

use super::{display_path, load_config};
use miette::{IntoDiagnostic, Result, WrapErr};
use packrat_core::bundler::{ArtifactKind, BuildCache, BuildOutput, Bundler, CancelToken};
use packrat_core::error::Error;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Schema version of the `--json` result.
pub const BUILD_SCHEMA_VERSION: u32 = 1;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub cwd: PathBuf,
    /// Explicit config file path (overrides discovery).
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct BuildResultJson {
    schema_version: u32,
    ok: bool,
    out_dir: String,
    modules: usize,
    duration_ms: u64,
    entrypoints: Vec<EntryJson>,
    artifacts: Vec<ArtifactJson>,
    written: WrittenJson,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct EntryJson {
    name: String,
    files: Vec<String>,
}

#[derive(Serialize)]
struct ArtifactJson {
    filename: String,
    kind: ArtifactKind,
    size: usize,
    hash: String,
}

#[derive(Serialize)]
struct WrittenJson {
    added: usize,
    changed: usize,
    removed: usize,
    unchanged: usize,
}

#[derive(Serialize)]
struct BuildErrorJson {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct BuildErrorResult {
    schema_version: u32,
    ok: bool,
    error: BuildErrorJson,
}

/// Run the build command.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let started = Instant::now();
    let result = load_config(&action.cwd, action.config.as_deref())
        .map_err(Error::from)
        .and_then(|config| Bundler::new(config).map_err(Error::from))
        .and_then(|bundler| {
            let output = bundler.run(&BuildCache::new(), &CancelToken::new())?;
            Ok((bundler, output))
        });

    match result {
        Ok((bundler, output)) => {
            let out_dir = display_path(&bundler.config().output.path, &action.cwd);
            let duration_ms = started.elapsed().as_millis() as u64;
            if json {
                let summary = to_json(&output, out_dir.display().to_string(), duration_ms);
                println!("{}", serde_json::to_string(&summary).into_diagnostic()?);
            } else {
                print_human_output(&output, &out_dir.display().to_string(), duration_ms);
            }
            Ok(())
        }
        Err(e) if json => {
            let result = BuildErrorResult {
                schema_version: BUILD_SCHEMA_VERSION,
                ok: false,
                error: BuildErrorJson {
                    code: error_code(&e),
                    message: e.to_string(),
                },
            };
            println!("{}", serde_json::to_string(&result).into_diagnostic()?);
            std::process::exit(1);
        }
        Err(e) => Err(e).into_diagnostic().wrap_err("build failed"),
    }
}

fn error_code(err: &Error) -> &'static str {
    match err {
        Error::Config(_) => "BUILD_CONFIG_INVALID",
        Error::Build(e) if e.resolution().is_some() => "BUILD_UNRESOLVED_IMPORT",
        Error::Build(_) => "BUILD_FAILED",
        Error::Emit(_) => "BUILD_EMIT_FAILED",
        Error::Plugin(_) => "BUILD_PLUGIN_FAILED",
    }
}

fn to_json(output: &BuildOutput, out_dir: String, duration_ms: u64) -> BuildResultJson {
    BuildResultJson {
        schema_version: BUILD_SCHEMA_VERSION,
        ok: true,
        out_dir,
        modules: output.graph.len(),
        duration_ms,
        entrypoints: output
            .emit
            .entrypoints
            .iter()
            .map(|e| EntryJson {
                name: e.name.clone(),
                files: e.files.clone(),
            })
            .collect(),
        artifacts: output
            .emit
            .artifacts
            .iter()
            .map(|a| ArtifactJson {
                filename: a.filename.clone(),
                kind: a.kind,
                size: a.bytes.len(),
                hash: a.content_hash.clone(),
            })
            .collect(),
        written: WrittenJson {
            added: output.diff.added.len(),
            changed: output.diff.changed.len(),
            removed: output.diff.removed.len(),
            unchanged: output.diff.unchanged.len(),
        },
        warnings: output.emit.warnings.clone(),
    }
}

fn print_human_output(output: &BuildOutput, out_dir: &str, duration_ms: u64) {
    let width = output
        .emit
        .artifacts
        .iter()
        .map(|a| a.filename.len())
        .max()
        .unwrap_or(0);

    for artifact in &output.emit.artifacts {
        let status = if output.diff.added.contains(&artifact.filename) {
            "added"
        } else if output.diff.changed.contains(&artifact.filename) {
            "changed"
        } else {
            "unchanged"
        };
        println!(
            "  {:<width$}  {:>9}  ({})",
            artifact.filename,
            format_size(artifact.bytes.len()),
            status,
        );
    }
    for removed in &output.diff.removed {
        println!("  {removed:<width$}  {:>9}  (removed)", "-");
    }

    for warning in &output.emit.warnings {
        eprintln!("warning: {warning}");
    }

    println!();
    println!(
        "Built {} modules into {} files in {out_dir} ({duration_ms}ms)",
        output.graph.len(),
        output.emit.artifacts.len(),
    );
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        #[allow(clippy::cast_precision_loss)]
        let kib = bytes as f64 / 1024.0;
        format!("{kib:.1} KiB")
    }
}
