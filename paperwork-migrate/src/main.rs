use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use tracing_subscriber::EnvFilter;

use paperwork_db::config::{
    DatabaseConfig, ENV_CQL_CONTACT_POINTS, ENV_CQL_KEYSPACE, ENV_MIGRATIONS_DIR,
};
use paperwork_db::driver;
use paperwork_db::migration::{MigrationError, MigrationPlan, MigrationRunner};
use paperwork_db::MigrationEvent;

#[derive(Parser, Debug)]
#[command(
    name = "paperwork-migrate",
    version,
    about = "Apply keyspace migrations for a Paperwork service"
)]
struct Cli {
    /// TOML configuration file (environment variables are used otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keyspace to migrate
    #[arg(long, global = true)]
    keyspace: Option<String>,

    /// Contact point (repeatable), e.g. --contact-point 127.0.0.1:9042
    #[arg(long = "contact-point", global = true)]
    contact_points: Vec<String>,

    /// Migrations root containing the `up/` directory
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply all pending migrations
    Run,
    /// Show applied and pending migrations without applying anything
    Status {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli, |key| std::env::var(key).ok())?;
    debug!("Database: configuration {config:?}");

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Status { format } => cmd_status(config, format).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Builds the configuration from a file or the environment, with command-line
/// flags taking precedence
fn load_config<F>(cli: &Cli, env: F) -> Result<DatabaseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(path) = &cli.config else {
        let overrides = env_overrides(cli)?;
        return DatabaseConfig::from_lookup(|key| {
            overrides.get(key).cloned().or_else(|| env(key))
        })
        .context("invalid database configuration in environment");
    };

    let mut config = DatabaseConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(keyspace) = &cli.keyspace {
        config.connection.set_keyspace(keyspace);
    }
    if !cli.contact_points.is_empty() {
        config.connection.contact_points = cli.contact_points.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_root = dir.clone();
    }
    config
        .validate()
        .context("invalid database configuration")?;
    Ok(config)
}

/// Command-line flags expressed as the environment variables they replace
fn env_overrides(cli: &Cli) -> Result<HashMap<&'static str, String>> {
    let mut overrides = HashMap::new();
    if let Some(keyspace) = &cli.keyspace {
        overrides.insert(ENV_CQL_KEYSPACE, keyspace.clone());
    }
    if !cli.contact_points.is_empty() {
        overrides.insert(
            ENV_CQL_CONTACT_POINTS,
            serde_json::to_string(&cli.contact_points)?,
        );
    }
    if let Some(dir) = &cli.migrations_dir {
        overrides.insert(ENV_MIGRATIONS_DIR, dir.display().to_string());
    }
    Ok(overrides)
}

fn runner(config: DatabaseConfig) -> Result<MigrationRunner> {
    let driver = driver::resolve(config.driver)?;
    Ok(MigrationRunner::new(Arc::new(config), driver))
}

async fn cmd_run(config: DatabaseConfig) -> Result<()> {
    let keyspace = config.keyspace().to_string();
    let runner = runner(config)?.with_hook(|event: &MigrationEvent| {
        if let MigrationEvent::MigrationApplied { record, duration } = event {
            println!("  applied {} ({}ms)", record.filename, duration.as_millis());
        }
    });

    match runner.run().await {
        Ok(report) if report.is_noop() => {
            println!("Keyspace '{keyspace}' is up to date");
            Ok(())
        }
        Ok(report) => {
            println!(
                "Applied {} migration(s) to keyspace '{keyspace}'",
                report.applied.len()
            );
            Ok(())
        }
        Err(err) => {
            if let MigrationError::LedgerWrite { filename, .. } = &err {
                eprintln!(
                    "'{filename}' was executed but is not recorded in {keyspace}.migrations; \
                     record it manually before running again"
                );
            }
            Err(err).context("migration run failed")
        }
    }
}

async fn cmd_status(config: DatabaseConfig, format: Format) -> Result<()> {
    let keyspace = config.keyspace().to_string();
    let plan = match runner(config)?.plan().await {
        Ok(plan) => plan,
        Err(err @ MigrationError::Integrity { .. }) => bail!("{err}"),
        Err(err) => return Err(err).context("failed to read migration status"),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        Format::Table => print!("{}", render_status(&keyspace, &plan)),
    }
    Ok(())
}

fn render_status(keyspace: &str, plan: &MigrationPlan) -> String {
    let mut out = format!(
        "Keyspace: {keyspace}\nApplied:  {}\nPending:  {}\n",
        plan.applied.len(),
        plan.pending.len()
    );
    for filename in &plan.pending {
        out.push_str(&format!("  {filename}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperwork_db::config::ENV_SERVICE_DIRNAME;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["paperwork-migrate", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert!(cli.config.is_none());
        assert!(cli.contact_points.is_empty());
    }

    #[test]
    fn test_parse_status_with_flags() {
        let cli = Cli::try_parse_from([
            "paperwork-migrate",
            "status",
            "--format",
            "json",
            "--keyspace",
            "users",
            "--contact-point",
            "10.0.0.1",
            "--contact-point",
            "10.0.0.2:9042",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Status {
                format: Format::Json
            }
        ));
        assert_eq!(cli.keyspace.as_deref(), Some("users"));
        assert_eq!(cli.contact_points, vec!["10.0.0.1", "10.0.0.2:9042"]);
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["paperwork-migrate"]).is_err());
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "paperwork-migrate",
            "--keyspace",
            "override",
            "--migrations-dir",
            "/srv/migrations",
            "run",
        ])
        .unwrap();

        let config = load_config(
            &cli,
            env(&[
                (ENV_CQL_CONTACT_POINTS, r#"["127.0.0.1"]"#),
                (ENV_CQL_KEYSPACE, "from_env"),
                (ENV_SERVICE_DIRNAME, "/srv/users/dist"),
            ]),
        )
        .unwrap();

        assert_eq!(config.keyspace(), "override");
        assert_eq!(config.connection.contact_points, vec!["127.0.0.1"]);
        assert_eq!(config.migrations_root, PathBuf::from("/srv/migrations"));
    }

    #[test]
    fn test_missing_environment_is_an_error() {
        let cli = Cli::try_parse_from(["paperwork-migrate", "run"]).unwrap();
        assert!(load_config(&cli, env(&[])).is_err());
    }

    #[test]
    fn test_config_file_with_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("database.toml");
        std::fs::write(
            &path,
            r#"
contact_points = ["10.0.0.1:9042"]
keyspace = "users"
migrations_root = "/srv/users/migrations/cql"
"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "paperwork-migrate",
            "--config",
            path.to_str().unwrap(),
            "--contact-point",
            "10.9.9.9",
            "status",
        ])
        .unwrap();

        let config = load_config(&cli, env(&[])).unwrap();
        assert_eq!(config.keyspace(), "users");
        assert_eq!(config.connection.contact_points, vec!["10.9.9.9"]);
    }

    #[test]
    fn test_keyspace_flag_is_folded() {
        let cli = Cli::try_parse_from(["paperwork-migrate", "--keyspace", "Users", "run"]).unwrap();

        let config = load_config(
            &cli,
            env(&[
                (ENV_CQL_CONTACT_POINTS, r#"["127.0.0.1"]"#),
                (ENV_SERVICE_DIRNAME, "/srv/users/dist"),
            ]),
        )
        .unwrap();

        assert_eq!(config.keyspace(), "users");
    }

    #[test]
    fn test_config_file_override_is_validated() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("database.toml");
        std::fs::write(
            &path,
            "contact_points = [\"10.0.0.1\"]\nkeyspace = \"users\"\nmigrations_root = \"/m\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "paperwork-migrate",
            "--config",
            path.to_str().unwrap(),
            "--keyspace",
            "not-valid",
            "run",
        ])
        .unwrap();

        assert!(load_config(&cli, env(&[])).is_err());
    }

    #[test]
    fn test_render_status() {
        let plan = MigrationPlan::diff(
            vec!["001_a.cql".into(), "002_b.cql".into()],
            vec!["001_a.cql".into()],
        );
        assert_eq!(
            render_status("users", &plan),
            "Keyspace: users\nApplied:  1\nPending:  1\n  002_b.cql\n"
        );
    }
}
