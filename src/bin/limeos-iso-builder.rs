use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use limeos_iso_builder::config::{cache_root, DEFAULT_SETTINGS_FILE};
use limeos_iso_builder::error::{EXIT_FAILURE, EXIT_SUCCESS};
use limeos_iso_builder::fetch::GithubClient;
use limeos_iso_builder::interrupt::InterruptGuard;
use limeos_iso_builder::manifest::{BuildManifest, BuildStatus};
use limeos_iso_builder::preflight::{check_host, require_root};
use limeos_iso_builder::process::SystemExecutor;
use limeos_iso_builder::version::is_valid_version;
use limeos_iso_builder::{BuildConfig, BuildContext, BuildError, BuildSettings, PhaseRunner, Phases};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Build(BuildArgs),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BuildArgs {
    version: String,
    no_cache: bool,
    config: Option<PathBuf>,
    verbose: bool,
}

fn usage() -> &'static str {
    "Usage:\n  limeos-iso-builder build <version> [--no-cache] [--config <file>] [-v]\n  limeos-iso-builder --help\n\n\
     Options:\n  --no-cache        Build everything from scratch and leave the cache untouched\n  \
     --config <file>   Settings file (default: ./limeos-build.toml when present)\n  \
     -v, --verbose     Debug logging"
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match parse_args(&args) {
        Ok(Command::Help) => {
            println!("{}", usage());
            ExitCode::from(EXIT_SUCCESS)
        }
        Ok(Command::Build(build_args)) => {
            init_tracing(build_args.verbose);
            match build(&build_args) {
                Ok(()) => ExitCode::from(EXIT_SUCCESS),
                Err(e) => {
                    let code = e.exit_code();
                    if e.is_cancelled() {
                        warn!("{}", e);
                    } else {
                        error!("{:#}", anyhow::Error::new(e));
                    }
                    ExitCode::from(code)
                }
            }
        }
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, usage());
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args {
        [flag, ..] if flag == "-h" || flag == "--help" => Ok(Command::Help),
        [build, version, rest @ ..] if build == "build" => {
            if version.starts_with('-') {
                return Err(format!("expected a version, got '{}'", version));
            }
            let mut parsed = BuildArgs {
                version: version.clone(),
                ..BuildArgs::default()
            };
            let mut rest = rest.iter();
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--no-cache" => parsed.no_cache = true,
                    "-v" | "--verbose" => parsed.verbose = true,
                    "--config" => {
                        let Some(path) = rest.next() else {
                            return Err("--config requires a file".to_string());
                        };
                        parsed.config = Some(PathBuf::from(path));
                    }
                    "-h" | "--help" => return Ok(Command::Help),
                    other => return Err(format!("unknown argument '{}'", other)),
                }
            }
            Ok(Command::Build(parsed))
        }
        [] => Err("missing command".to_string()),
        [other, ..] => Err(format!("unknown command '{}'", other)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "limeos_iso_builder=debug"
    } else {
        "limeos_iso_builder=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build(args: &BuildArgs) -> Result<(), BuildError> {
    if !is_valid_version(&args.version) {
        return Err(BuildError::InvalidVersion(args.version.clone()));
    }
    require_root()?;

    let settings = BuildSettings::load_or_default(args.config.as_deref()).map_err(|source| {
        BuildError::Settings {
            path: args
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            source,
        }
    })?;
    check_host(&settings).map_err(BuildError::Preflight)?;

    let cache_root = if args.no_cache {
        info!("Caching disabled (--no-cache)");
        None
    } else {
        match cache_root() {
            Ok(root) => Some(root),
            Err(e) => {
                warn!("{:#}, continuing without cache", e);
                None
            }
        }
    };
    let config = BuildConfig::new(&args.version, cache_root.is_some());
    info!("Building LimeOS {}", config.version);

    let guard = InterruptGuard::new();
    if let Err(e) = guard.install() {
        warn!("{:#}, interrupts will not clean up the build directory", e);
    }

    let exec = SystemExecutor;
    let host = GithubClient::new(&settings.github);
    let ctx = BuildContext::new(&config, &settings, &exec, &host, cache_root);
    let mut phases = Phases::new(ctx);
    let mut manifest = BuildManifest::begin(&config);

    let result = PhaseRunner::new(&settings.paths.build_dir, guard).run(&mut phases);

    manifest.finish(BuildStatus::from_result(&result), phases.components());
    manifest.write_best_effort(&manifest.path_in(&settings.paths.output_dir, &config));

    if let Some(iso) = phases.iso() {
        info!("Build complete: {}", iso.display());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_build_with_options() {
        let cmd = parse_args(&args(&["build", "v1.2.3", "--no-cache", "--config", "b.toml", "-v"]));
        assert_eq!(
            cmd,
            Ok(Command::Build(BuildArgs {
                version: "v1.2.3".into(),
                no_cache: true,
                config: Some(PathBuf::from("b.toml")),
                verbose: true,
            }))
        );
    }

    #[test]
    fn help_flags() {
        assert_eq!(parse_args(&args(&["--help"])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["-h"])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["build", "1.0.0", "-h"])), Ok(Command::Help));
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["build"])).is_err());
        assert!(parse_args(&args(&["build", "--no-cache"])).is_err());
        assert!(parse_args(&args(&["build", "1.0.0", "--fast"])).is_err());
        assert!(parse_args(&args(&["build", "1.0.0", "--config"])).is_err());
        assert!(parse_args(&args(&["deploy", "1.0.0"])).is_err());
    }

    #[test]
    fn invalid_version_fails_before_root_check() {
        let err = build(&BuildArgs {
            version: "1.2".into(),
            ..BuildArgs::default()
        })
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidVersion(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
