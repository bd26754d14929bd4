use clap::Parser;
use clap_derive::{Parser, Subcommand};
use config::{load_env_file, PathManager, Settings};
use rackplan_core::{DiagnosticFilter, EditorOptions, Entity, ScopeId};
use std::path::{Path, PathBuf};

mod logging;
mod script;

use script::{Script, ScriptRunner, StepReport};

const DEFAULT_SCOPE: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "rackplan", author, version, about = "Headless warehouse layout engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a TOML script of editor intents against an in-memory store
    Replay {
        script: PathBuf,

        /// Scope to connect to; overrides the script's own
        #[arg(long)]
        scope: Option<String>,

        /// Settings file to use instead of the default location
        #[arg(long, env = "RACKPLAN_SETTINGS")]
        settings: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Write diagnostics as JSON lines, to PATH or the data directory
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        export: Option<Option<PathBuf>>,
    },
    /// Print effective settings and paths
    Settings {
        #[arg(long, env = "RACKPLAN_SETTINGS")]
        settings: Option<PathBuf>,
    },
}

fn load_settings(path: Option<&Path>) -> Settings {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_file();
    let args = Args::parse();

    match args.command {
        Command::Replay {
            script,
            scope,
            settings,
            json,
            export,
        } => {
            let settings = load_settings(settings.as_deref());
            logging::init_logging(&settings.logging);
            let runner = replay(&script, scope, &settings, json).await?;
            if let Some(target) = export {
                export_diagnostics(&runner, target)?;
            }
            runner.editor().disconnect();
            Ok(())
        }
        Command::Settings { settings } => {
            let settings = load_settings(settings.as_deref());
            print_settings(&settings)
        }
    }
}

async fn replay(
    path: &Path,
    scope: Option<String>,
    settings: &Settings,
    json: bool,
) -> anyhow::Result<ScriptRunner> {
    let script = Script::load(path)?;
    let scope = scope
        .or_else(|| script.scope.clone())
        .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
    tracing::info!(script = %path.display(), scope = %scope, steps = script.steps.len(), "replaying");

    let mut runner = ScriptRunner::new(EditorOptions::from(&settings.layout));
    runner.connect(ScopeId::from_string(scope)).await?;
    let reports = runner.run(&script).await?;
    let entities = runner.entities();
    let diagnostics = runner.editor().diagnostics().query(&DiagnosticFilter::new());

    if json {
        let output = serde_json::json!({
            "steps": reports,
            "entities": entities,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_steps(&reports);
        print_entities(&runner, &entities);
        println!();
        println!("Diagnostics:");
        for event in diagnostics {
            println!(
                "  {} {:<5} {:<10} {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.level.to_string(),
                event.category.to_string(),
                event.message
            );
        }
    }

    Ok(runner)
}

fn export_diagnostics(runner: &ScriptRunner, target: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match target {
        Some(path) => path,
        None => {
            PathManager::ensure_dirs_exist()?;
            PathManager::diagnostics_path()
                .ok_or_else(|| anyhow::anyhow!("Could not determine diagnostics path"))?
        }
    };
    let lines = runner
        .editor()
        .diagnostics()
        .to_json_lines(&DiagnosticFilter::new());
    std::fs::write(&path, lines)?;
    tracing::info!(path = %path.display(), "diagnostics exported");
    eprintln!("Diagnostics written to {}", path.display());
    Ok(())
}

fn print_steps(reports: &[StepReport]) {
    println!("Steps:");
    for report in reports {
        let mark = if report.ok { "ok" } else { "FAIL" };
        println!("  {:>3} {:<9} {:<4} {}", report.index + 1, report.op, mark, report.detail);
    }
    println!();
}

fn print_entities(runner: &ScriptRunner, entities: &[Entity]) {
    println!(
        "{:<12} {:<9} {:<10} {:<20} {:<10} {}",
        "ALIAS", "KIND", "STATUS", "PATH", "REMOTE", "DIRTY"
    );
    for entity in entities {
        let remote = entity
            .remote_id
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<9} {:<10} {:<20} {:<10} {}",
            runner.name_of(&entity.local_id),
            entity.kind().as_str(),
            entity.status.as_str(),
            entity.path,
            remote,
            if entity.dirty { "yes" } else { "" }
        );
        if let Some(error) = &entity.validation_error {
            println!("{:<12} error: {}", "", error);
        }
    }
}

fn print_settings(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(settings)?);
    let show = |label: &str, path: Option<PathBuf>| match path {
        Some(p) => println!("# {:<12} {}", label, p.display()),
        None => println!("# {:<12} (unavailable)", label),
    };
    show("settings", PathManager::settings_path());
    show("log file", PathManager::log_file_path());
    show("diagnostics", PathManager::diagnostics_path());
    Ok(())
}
