//! Command-line front end: `build`, `state show`, `state rm`.
//!
//! This is peripheral glue over the core session/build-wrapper
//! interfaces (`SPEC_FULL.md` §6) — it owns argument parsing and
//! rendering, never state-document semantics itself.

use crate::config::Config;
use crate::error::ForgeError;
use crate::shell_engine::{ShellEngine, default_artifact_dir};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use forgestate_engine::BuildSpec;
use forgestate_manager::Session;
use std::collections::BTreeMap;

#[derive(Parser)]
#[command(
    name = "forgestate",
    version,
    about = "Durable, crash-safe state engine around an external image-build provisioner",
    long_about = "forgestate tracks build progress for a provisioning template so that \
an unchanged template skips work, a partial failure resumes from its last \
checkpoint, and concurrent invocations never corrupt the state file.\n\n\
Examples:\n  \
forgestate build --template web.pkr.hcl --build web --type qemu --step shell:install\n  \
forgestate state show --state web/builder-state.json\n  \
forgestate state rm --state web/builder-state.json --build web"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose structured logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Lock/owner identity override (default: user@host).
    #[arg(long, global = true)]
    pub who: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run (or skip, or resume) a build, checkpointing as it goes.
    Build {
        /// Path to the provisioning template this build is defined in.
        #[arg(long)]
        template: Utf8PathBuf,

        /// State file path; defaults to a file beside the template.
        #[arg(long)]
        state: Option<Utf8PathBuf>,

        /// Logical build name.
        #[arg(long)]
        build: String,

        /// Engine/build kind label.
        #[arg(long = "type", default_value = "qemu")]
        build_type: String,

        /// Provisioner step as `type:name`; may be repeated.
        #[arg(long = "step")]
        steps: Vec<String>,

        /// Template variable as `key=value`; may be repeated.
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Auxiliary file whose content hash participates in the
        /// fingerprint; may be repeated.
        #[arg(long = "file")]
        files: Vec<Utf8PathBuf>,

        /// Shell command run once before provisioning starts.
        #[arg(long)]
        create_cmd: Option<String>,

        /// Shell command run per step; `{build}` and `{step}` are
        /// substituted.
        #[arg(long, default_value = "true")]
        step_cmd: String,

        /// Shell command run after all steps complete.
        #[arg(long)]
        finalize_cmd: Option<String>,
    },

    /// Inspect or prune a state file.
    #[command(subcommand)]
    State(StateCommands),
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// Render the state document in a human-readable form.
    Show {
        #[arg(long)]
        state: Utf8PathBuf,
    },
    /// Remove one build's record from the state document.
    Rm {
        #[arg(long)]
        state: Utf8PathBuf,
        #[arg(long)]
        build: String,
    },
}

/// Parse `std::env::args`, run, and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    if let Err(e) = forgestate_utils::logging::init_tracing(cli.verbose) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    let config = Config {
        who: cli.who.clone().unwrap_or_else(Config::default_who),
    };

    match dispatch(cli, &config) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.to_exit_code()
        }
    }
}

fn dispatch(cli: Cli, config: &Config) -> Result<(), ForgeError> {
    match cli.command {
        Commands::Build {
            template,
            state,
            build,
            build_type,
            steps,
            vars,
            files,
            create_cmd,
            step_cmd,
            finalize_cmd,
        } => run_build_command(
            config, template, state, build, build_type, steps, vars, files, create_cmd, step_cmd,
            finalize_cmd,
        ),
        Commands::State(StateCommands::Show { state }) => state_show(&state),
        Commands::State(StateCommands::Rm { state, build }) => state_rm(config, &state, &build),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_build_command(
    config: &Config,
    template: Utf8PathBuf,
    state: Option<Utf8PathBuf>,
    build: String,
    build_type: String,
    steps: Vec<String>,
    vars: Vec<String>,
    files: Vec<Utf8PathBuf>,
    create_cmd: Option<String>,
    step_cmd: String,
    finalize_cmd: Option<String>,
) -> Result<(), ForgeError> {
    let state_path = state.unwrap_or_else(|| forgestate_utils::paths::default_state_path(&template));

    let template_hash = forgestate_fingerprint::hash_file(&template)
        .map_err(|e| ForgeError::IoError(e.to_string()))?;

    let mut variables = BTreeMap::new();
    for v in &vars {
        let (k, val) = v
            .split_once('=')
            .ok_or_else(|| ForgeError::IoError(format!("--var {v} is not key=value")))?;
        variables.insert(k.to_string(), val.to_string());
    }

    let mut file_hashes = BTreeMap::new();
    for f in &files {
        let hash = forgestate_fingerprint::hash_file(f).map_err(|e| ForgeError::IoError(e.to_string()))?;
        file_hashes.insert(f.to_string(), hash);
    }

    let mut session = Session::open(&state_path, "build", &config.who)?;

    let inputs_changed = session.inputs_changed(&template_hash, &variables, &file_hashes);
    session.update_template_inputs(template.to_string(), template_hash, variables, file_hashes);
    session.save()?;

    let provisioners: Vec<(String, String)> = steps
        .iter()
        .map(|s| {
            s.split_once(':')
                .map(|(t, n)| (t.to_string(), n.to_string()))
                .unwrap_or_else(|| ("shell".to_string(), s.clone()))
        })
        .collect();

    let spec = BuildSpec {
        name: build.clone(),
        build_type,
        provisioners,
    };

    let artifact_dir = default_artifact_dir(&state_path);
    let engine = ShellEngine {
        create_cmd,
        step_cmd,
        finalize_cmd,
        artifact_dir,
    };

    let result = forgestate_engine::run_build(&mut session, &spec, !inputs_changed, &engine);

    match result {
        Ok((artifacts, trace)) => {
            session.close()?;
            println!("build {build} finished ({trace:?}), {} artifact(s)", artifacts.len());
            Ok(())
        }
        Err(e) => {
            let _ = session.unlock();
            Err(e.into())
        }
    }
}

fn state_show(state_path: &Utf8PathBuf) -> Result<(), ForgeError> {
    let doc = forgestate_store::load(state_path)?;
    match doc {
        Some(doc) => {
            let rendered = serde_json::to_string_pretty(&doc).expect("StateDocument serializes");
            println!("{rendered}");
            Ok(())
        }
        None => {
            println!("no state at {state_path}");
            Ok(())
        }
    }
}

fn state_rm(config: &Config, state_path: &Utf8PathBuf, build: &str) -> Result<(), ForgeError> {
    let mut session = Session::open(state_path, "rm", &config.who)?;
    let removed = session.document_mut().builds.remove(build);
    if removed.is_none() {
        let _ = session.unlock();
        return Err(ForgeError::NoSuchBuild(build.to_string()));
    }
    session.save()?;
    session.close()?;
    println!("removed build {build} from {state_path}");
    Ok(())
}
