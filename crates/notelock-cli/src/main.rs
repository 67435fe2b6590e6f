use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use notelock_core::capabilities::{StaticAccount, StaticBiometrics};
use notelock_core::config::NotelockConfig;
use notelock_core::passcode::{PasscodeCredential, PasscodeFile};
use notelock_core::persistence::JsonFilePersistence;
use notelock_core::relock::{required_locks, LockTrigger};
use notelock_core::{
    LockError, LockMethod, LockSettings, StorageEncryptionPolicy, UnlockPolicyStore, UnlockTiming,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod terminal;

use terminal::{prompt_passcode_once, prompt_passcode_twice, TerminalConfirmation};

const LOG_ENV: &str = "NOTELOCK_LOG";

#[derive(Parser)]
#[command(name = "notelock")]
#[command(about = "Manage local encryption and app lock settings", long_about = None)]
struct Cli {
    /// Directory holding the unlock policy and passcode files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    Enable,
    Disable,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct TriggerArgs {
    /// Cold start
    #[arg(long)]
    launch: bool,

    /// Resume after this many seconds in the background
    #[arg(long)]
    background_secs: Option<u64>,
}

impl TriggerArgs {
    fn trigger(&self) -> LockTrigger {
        match self.background_secs {
            Some(secs) if !self.launch => LockTrigger::Resume {
                background: Duration::from_secs(secs),
            },
            _ => LockTrigger::Launch,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current policy and the settings section
    Status,

    /// List timing options for a lock method
    Options {
        method: LockMethod,
    },

    /// Turn storage encryption on or off
    Encryption {
        #[arg(value_enum)]
        action: Toggle,
    },

    /// Turn the passcode lock on or off
    Passcode {
        #[arg(value_enum)]
        action: Toggle,
    },

    /// Turn the biometric lock on or off
    Biometrics {
        #[arg(value_enum)]
        action: Toggle,
    },

    /// Change when a lock re-engages (immediately, on-quit, <n>m)
    Timing {
        method: LockMethod,
        timing: UnlockTiming,
    },

    /// Print which locks a launch or resume must satisfy
    Check {
        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Satisfy the passcode lock for a launch or resume
    Unlock {
        #[command(flatten)]
        trigger: TriggerArgs,
    },
}

struct App {
    settings: LockSettings,
    passcode_file: PasscodeFile,
}

impl App {
    fn store(&self) -> &Arc<UnlockPolicyStore> {
        self.settings.store()
    }
}

async fn open(cli: &Cli, config: &NotelockConfig) -> Result<App> {
    let data_dir = config.resolve_data_dir(cli.data_dir.clone())?;
    debug!(dir = %data_dir.display(), "using data directory");

    let persistence = Arc::new(JsonFilePersistence::in_dir(&data_dir));
    let account = Arc::new(StaticAccount::new(config.account.signed_in));
    let store = UnlockPolicyStore::load(persistence, account, config.store_options())
        .await
        .with_context(|| format!("load unlock policy from {}", data_dir.display()))?;

    let biometrics = Arc::new(StaticBiometrics {
        available: config.device.biometrics_available,
        enrolled: config.device.biometrics_enrolled,
    });
    let settings = LockSettings::new(
        Arc::new(store),
        biometrics,
        Arc::new(TerminalConfirmation::new(cli.yes)),
        config.default_timings(),
    );
    settings.refresh_capabilities().await;

    Ok(App {
        settings,
        passcode_file: PasscodeFile::in_dir(&data_dir),
    })
}

fn init_tracing(config: &NotelockConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn enable_passcode(app: &App) -> Result<()> {
    if app.store().is_enabled(LockMethod::Passcode) {
        app.settings.enable_passcode().await?;
        info!("passcode lock already enabled");
        return Ok(());
    }
    let passcode = prompt_passcode_twice("New passcode: ")?;
    let credential = PasscodeCredential::create(&passcode)?;
    app.passcode_file.save(&credential)?;
    if let Err(e) = app.settings.enable_passcode().await {
        if let Err(cleanup) = app.passcode_file.remove() {
            warn!(error = %cleanup, "failed to remove passcode after enable failed");
        }
        return Err(e.into());
    }
    info!("passcode lock enabled");
    Ok(())
}

async fn disable_passcode(app: &App) -> Result<()> {
    if !app.store().is_enabled(LockMethod::Passcode) {
        println!("unchanged");
        return Ok(());
    }
    match app.settings.disable_passcode().await {
        Ok(()) => {
            app.passcode_file.remove()?;
            info!(
                encryption = ?app.store().encryption_policy(),
                "passcode lock disabled"
            );
            Ok(())
        }
        Err(LockError::NotConfirmed) => {
            println!("unchanged");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn unlock(app: &App, trigger: LockTrigger) -> Result<()> {
    let required = required_locks(&app.store().snapshot(), trigger);
    if required.is_empty() {
        println!("no lock required");
        return Ok(());
    }
    if required.contains(&LockMethod::Passcode) {
        let credential = app
            .passcode_file
            .load()?
            .ok_or_else(|| anyhow!("passcode lock is enabled but no passcode is stored"))?;
        let passcode = prompt_passcode_once("Passcode: ")?;
        let ok = tokio::task::spawn_blocking(move || credential.verify(&passcode)).await?;
        if !ok {
            return Err(anyhow!("incorrect passcode"));
        }
        info!("passcode accepted");
    }
    if required.contains(&LockMethod::Biometrics) {
        println!("biometric check required on device");
    }
    println!("unlocked");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NotelockConfig::load(path)?,
        None => NotelockConfig::load_default()?,
    };
    init_tracing(&config);

    let app = open(&cli, &config).await?;

    match cli.command {
        Commands::Status => {
            print_json(&json!({
                "policy": app.store().snapshot(),
                "section": app.settings.view(),
            }))?;
        }

        Commands::Options { method } => {
            print_json(&json!(app.store().timing_choices(method)))?;
        }

        Commands::Encryption { action } => {
            let wanted = matches!(action, Toggle::Enable);
            let encrypted = app.store().encryption_policy() == StorageEncryptionPolicy::Default;
            if wanted == encrypted {
                println!("unchanged");
            } else {
                let policy = app.settings.toggle_encryption().await?;
                print_json(&json!({ "encryption_policy": policy }))?;
            }
        }

        Commands::Passcode { action } => match action {
            Toggle::Enable => enable_passcode(&app).await?,
            Toggle::Disable => disable_passcode(&app).await?,
        },

        Commands::Biometrics { action } => {
            match action {
                Toggle::Enable => app.settings.enable_biometrics().await?,
                Toggle::Disable => app.settings.disable_biometrics().await?,
            }
            print_json(&json!(app.store().lock_state(LockMethod::Biometrics)))?;
        }

        Commands::Timing { method, timing } => {
            app.settings.set_timing(method, timing).await?;
            print_json(&json!(app.store().lock_state(method)))?;
        }

        Commands::Check { trigger } => {
            let required = required_locks(&app.store().snapshot(), trigger.trigger());
            print_json(&json!({ "required": required }))?;
        }

        Commands::Unlock { trigger } => unlock(&app, trigger.trigger()).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notelock_core::capabilities::{FixedConfirmation, MemoryPersistence};
    use notelock_core::passcode::KdfParams;
    use notelock_core::settings::DefaultTimings;
    use notelock_core::StoreOptions;
    use tempfile::tempdir;

    const CHEAP: KdfParams = KdfParams {
        memory_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };

    async fn app_in(dir: &std::path::Path, confirmation: Arc<FixedConfirmation>) -> App {
        let store = UnlockPolicyStore::load(
            Arc::new(MemoryPersistence::new()),
            Arc::new(StaticAccount::new(false)),
            StoreOptions::default(),
        )
        .await
        .unwrap();
        App {
            settings: LockSettings::new(
                Arc::new(store),
                Arc::new(StaticBiometrics {
                    available: false,
                    enrolled: false,
                }),
                confirmation,
                DefaultTimings::default(),
            ),
            passcode_file: PasscodeFile::in_dir(dir),
        }
    }

    #[tokio::test]
    async fn disable_when_off_keeps_stored_passcode() {
        let dir = tempdir().unwrap();
        let confirmation = Arc::new(FixedConfirmation::new(true));
        let app = app_in(dir.path(), confirmation.clone()).await;
        let credential = PasscodeCredential::create_with("2468", CHEAP).unwrap();
        app.passcode_file.save(&credential).unwrap();

        disable_passcode(&app).await.unwrap();

        assert!(confirmation.last_message().is_none());
        assert!(app.passcode_file.load().unwrap().is_some());
        assert!(!app.store().is_enabled(LockMethod::Passcode));
    }

    #[tokio::test]
    async fn disable_when_on_removes_stored_passcode() {
        let dir = tempdir().unwrap();
        let confirmation = Arc::new(FixedConfirmation::new(true));
        let app = app_in(dir.path(), confirmation.clone()).await;
        let credential = PasscodeCredential::create_with("2468", CHEAP).unwrap();
        app.passcode_file.save(&credential).unwrap();
        app.settings.enable_passcode().await.unwrap();

        disable_passcode(&app).await.unwrap();

        assert!(confirmation.last_message().is_some());
        assert!(app.passcode_file.load().unwrap().is_none());
        assert!(!app.store().is_enabled(LockMethod::Passcode));
    }
}
