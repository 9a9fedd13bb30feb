//! fenc: file encryption command-line interface
//!
//! Commands:
//!   encrypt <files..>          - encrypt files (generates temp_<file> keys when no key is named)
//!   decrypt <files..>          - decrypt files with a stored key
//!   key generate|import-rsa|list|show|delete
//!   hash <files..>             - print digests
//!   verify <file> <digest>     - compare a file against an expected digest
//!   algorithms                 - list ciphers and hash algorithms
//!   config show                - display the active configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fenc_core::config::expand_tilde;
use fenc_core::{Direction, FencConfig, FencError, FileOutcome, JobProgress};
use fenc_crypto::{
    hash_data, hash_file, verify_file_hash, Cipher, CipherParams, HashAlgorithm, KeyMaterial,
    StreamOptions,
};
use fenc_engine::{run_job, FencContext, FileJob};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fenc",
    version,
    about = "File encryption and key management",
    long_about = "fenc: encrypt, decrypt and hash files; manage password-protected keys"
)]
struct Cli {
    /// Path to fenc.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FENC_CONFIG",
        default_value = "~/.file_encrypter/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "FENC_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging] format
    #[arg(long, env = "FENC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt files
    Encrypt(FileArgs),

    /// Decrypt files (requires --key)
    Decrypt(FileArgs),

    /// Key management
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Print file digests
    Hash {
        files: Vec<PathBuf>,
        /// Hash algorithm (MD5, SHA1, SHA256, SHA3-256, BLAKE2b, BLAKE3, ...)
        #[arg(long, short = 'a', default_value = "SHA256")]
        algorithm: HashAlgorithm,
    },

    /// Check a file against an expected hex digest
    Verify {
        file: PathBuf,
        expected: String,
        #[arg(long, short = 'a', default_value = "SHA256")]
        algorithm: HashAlgorithm,
    },

    /// List supported ciphers and hash algorithms
    Algorithms,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct FileArgs {
    /// Files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Stored key to use
    #[arg(long, short = 'k')]
    key: Option<String>,

    /// Algorithm for a generated key (default: [encryption] default_algorithm)
    #[arg(long, short = 'a')]
    algorithm: Option<String>,

    /// Output directory (default: next to each input)
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Remove the input after success
    #[arg(long)]
    delete: bool,

    /// Prompt for the key record password
    #[arg(long, short = 'p')]
    password: bool,

    /// Prompt for the RSA private key passphrase
    #[arg(long)]
    pem_passphrase: bool,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Generate and store a new key
    Generate {
        name: String,
        #[arg(long, short = 'a', default_value = "AES-256-CBC")]
        algorithm: String,
        /// Protect the record with a password (prompted)
        #[arg(long, short = 'p')]
        password: bool,
        /// Encrypt the RSA private key with a passphrase (prompted)
        #[arg(long)]
        pem_passphrase: bool,
    },

    /// Store an RSA key from PEM files
    ImportRsa {
        name: String,
        #[arg(long, short = 'a', default_value = "RSA-2048")]
        algorithm: String,
        #[arg(long)]
        public: Option<PathBuf>,
        #[arg(long)]
        private: Option<PathBuf>,
        /// The private PEM is encrypted (prompted)
        #[arg(long)]
        pem_passphrase: bool,
        /// Protect the record with a password (prompted)
        #[arg(long, short = 'p')]
        password: bool,
    },

    /// List stored keys (no passwords needed, no secrets shown)
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show key metadata
    Show {
        name: String,
    },

    /// Delete a stored key
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = FencConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let level = log_directive(cli.log.as_deref(), rust_log.as_deref(), &config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "fenc starting"
    );

    let ctx = Arc::new(FencContext::new(config).context("building context")?);

    match cli.command {
        Commands::Encrypt(args) => cmd_files(ctx, Direction::Encrypt, args).await,
        Commands::Decrypt(args) => cmd_files(ctx, Direction::Decrypt, args).await,
        Commands::Key { action } => cmd_key(&ctx, action),
        Commands::Hash { files, algorithm } => cmd_hash(&ctx, &files, algorithm),
        Commands::Verify { file, expected, algorithm } => cmd_verify(&file, &expected, algorithm),
        Commands::Algorithms => cmd_algorithms(&ctx),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&ctx, &config_path),
    }
}

/// `--log`/`FENC_LOG` wins, then `RUST_LOG`, then `[logging] level`.
fn log_directive(explicit: Option<&str>, rust_log: Option<&str>, configured: &str) -> String {
    explicit
        .or(rust_log)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(configured)
        .to_string()
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────────

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(value))
}

fn prompt_new_secret(what: &str) -> Result<SecretString> {
    let first = rpassword::prompt_password(format!("New {what}: ")).context("reading password")?;
    if first.is_empty() {
        anyhow::bail!("{what} must not be empty");
    }
    let second =
        rpassword::prompt_password(format!("Repeat {what}: ")).context("reading password")?;
    if first != second {
        anyhow::bail!("{what}s do not match");
    }
    Ok(SecretString::from(first))
}

/// Load a key, prompting for its password only if the record turns out to be protected.
fn load_key_interactive(ctx: &FencContext, name: &str) -> Result<KeyMaterial> {
    match ctx.keys().load(name, None) {
        Ok(material) => Ok(material),
        Err(FencError::PasswordRequired(_)) => {
            let password = prompt_secret(&format!("Password for key '{name}': "))?;
            ctx.keys()
                .load(name, Some(&password))
                .with_context(|| format!("loading key '{name}'"))
        }
        Err(e) => Err(e).with_context(|| format!("loading key '{name}'")),
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(multi: &MultiProgress, path: &Path) -> ProgressBar {
    let pb = multi.add(ProgressBar::new(100));
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `fenc encrypt` / `fenc decrypt` ───────────────────────────────────────────

async fn cmd_files(ctx: Arc<FencContext>, direction: Direction, args: FileArgs) -> Result<()> {
    let protected = match &args.key {
        Some(name) => is_protected(&ctx, name)?,
        None => false,
    };
    let password = match &args.key {
        Some(name) if args.password || protected => {
            Some(prompt_secret(&format!("Password for key '{name}': "))?)
        }
        None if args.password && direction == Direction::Encrypt => {
            Some(prompt_new_secret("password for generated keys")?)
        }
        _ => None,
    };
    let pem_passphrase = if args.pem_passphrase {
        Some(prompt_secret("RSA private key passphrase: ")?)
    } else {
        None
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let multi = MultiProgress::new();
    let mut tasks = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let mut job = FileJob::new(direction, vec![path.clone()]);
        job.algorithm = args.algorithm.clone();
        job.key_name = args.key.clone();
        job.key_password = password.clone();
        job.pem_passphrase = pem_passphrase.clone();
        job.output_dir = args.output_dir.clone();
        job.delete_original = args.delete;

        let ctx = Arc::clone(&ctx);
        let cancel = Arc::clone(&cancel);
        let pb = make_progress_bar(&multi, path);
        tasks.push(tokio::task::spawn_blocking(move || {
            let outcomes = run_job(&ctx, &job, Some(&cancel), |p: JobProgress| {
                pb.set_position(p.percent.round() as u64);
                pb.set_message(p.status);
            });
            pb.finish_and_clear();
            outcomes
        }));
    }

    let mut outcomes: Vec<FileOutcome> = Vec::with_capacity(tasks.len());
    for task in tasks {
        outcomes.extend(task.await.context("file task panicked")?);
    }

    let failed = print_outcomes(&outcomes);
    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed", outcomes.len());
    }
    Ok(())
}

fn is_protected(ctx: &FencContext, name: &str) -> Result<bool> {
    let name = fenc_keys::sanitize_name(name)?;
    Ok(ctx
        .keys()
        .list()
        .context("listing keys")?
        .iter()
        .any(|k| k.name == name && k.is_password_protected))
}

fn print_outcomes(outcomes: &[FileOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        match (&outcome.output, outcome.success) {
            (Some(output), true) => {
                println!("ok    {} → {}", outcome.path.display(), output.display());
                println!("      {}", outcome.message);
            }
            _ => {
                failed += 1;
                let kind = outcome
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "error".into());
                eprintln!("FAIL  {} [{kind}] {}", outcome.path.display(), outcome.message);
            }
        }
    }
    failed
}

// ── `fenc key ...` ────────────────────────────────────────────────────────────

fn cmd_key(ctx: &FencContext, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Generate { name, algorithm, password, pem_passphrase } => {
            let cipher = ctx.cipher(&algorithm)?;
            let mut params = CipherParams::default();
            if pem_passphrase {
                params = params.with_passphrase(prompt_new_secret("RSA private key passphrase")?);
            }
            let password = if password { Some(prompt_new_secret("key password")?) } else { None };

            let spinner = make_spinner("key");
            spinner.set_message(format!("generating {algorithm}..."));
            let material = cipher.generate_key(&params)?;
            spinner.finish_and_clear();

            let path = ctx
                .keys()
                .save(&material, &name, password.as_ref())
                .with_context(|| format!("saving key '{name}'"))?;
            println!("Generated {} key '{name}'", material.algorithm);
            println!("  path: {}", path.display());
            Ok(())
        }

        KeyAction::ImportRsa { name, algorithm, public, private, pem_passphrase, password } => {
            let cipher = ctx.cipher(&algorithm)?;
            let rsa = cipher
                .as_rsa()
                .with_context(|| format!("{algorithm} is not an RSA algorithm"))?;
            let read = |p: &Option<PathBuf>| -> Result<Option<String>> {
                p.as_ref()
                    .map(|p| {
                        std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))
                    })
                    .transpose()
            };
            let public = read(&public)?;
            let private = read(&private)?;
            let passphrase = if pem_passphrase {
                Some(prompt_secret("RSA private key passphrase: ")?)
            } else {
                None
            };
            let material = rsa.load_key(public.as_deref(), private.as_deref(), passphrase.as_ref())?;

            let password = if password { Some(prompt_new_secret("key password")?) } else { None };
            let path = ctx.keys().save(&material, &name, password.as_ref())?;
            println!(
                "Imported {} key '{name}' ({})",
                material.algorithm,
                if material.has_private_half() { "public + private" } else { "public only" }
            );
            println!("  path: {}", path.display());
            Ok(())
        }

        KeyAction::List { json } => {
            let keys = ctx.keys().list().context("listing keys")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
                return Ok(());
            }
            if keys.is_empty() {
                println!("No keys in {}", ctx.keys().dir().display());
                return Ok(());
            }
            println!("{:<32} {:<20} PROTECTED", "NAME", "ALGORITHM");
            for key in &keys {
                println!(
                    "{:<32} {:<20} {}",
                    key.name,
                    key.algorithm.as_deref().unwrap_or("-"),
                    if key.is_password_protected { "yes" } else { "no" }
                );
            }
            Ok(())
        }

        KeyAction::Show { name } => {
            let material = load_key_interactive(ctx, &name)?;
            println!("Key: {name}");
            println!("  algorithm:  {}", material.algorithm);
            println!("  key size:   {} bits", material.key_size);
            if let Some(mode) = &material.mode {
                println!("  mode:       {mode}");
            }
            println!("  created:    {} (unix)", material.created_at);
            if let Some(public) = &material.public_pem {
                println!(
                    "  public:     sha256:{}",
                    hash_data(public.as_bytes(), HashAlgorithm::Sha256)
                );
                println!(
                    "  private:    {}",
                    match (material.has_private_half(), material.private_key_encrypted) {
                        (true, true) => "present (passphrase-encrypted)",
                        (true, false) => "present",
                        (false, _) => "absent",
                    }
                );
            }
            Ok(())
        }

        KeyAction::Delete { name } => {
            if ctx.keys().delete(&name)? {
                println!("Deleted key '{name}'");
            } else {
                println!("No key named '{name}'");
            }
            Ok(())
        }
    }
}

// ── `fenc hash` / `fenc verify` ───────────────────────────────────────────────

fn cmd_hash(ctx: &FencContext, files: &[PathBuf], algorithm: HashAlgorithm) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given");
    }
    for file in files {
        let mut options =
            StreamOptions::default().with_chunk_size(ctx.config().encryption.chunk_size);
        let digest = hash_file(file, algorithm, &mut options)
            .with_context(|| format!("hashing {}", file.display()))?;
        println!("{digest}  {}", file.display());
    }
    Ok(())
}

fn cmd_verify(file: &Path, expected: &str, algorithm: HashAlgorithm) -> Result<()> {
    let matches = verify_file_hash(file, expected, algorithm)
        .with_context(|| format!("hashing {}", file.display()))?;
    if !matches {
        anyhow::bail!("{}: {algorithm} digest does not match", file.display());
    }
    println!("{}: OK", file.display());
    Ok(())
}

// ── `fenc algorithms` ─────────────────────────────────────────────────────────

fn cmd_algorithms(ctx: &FencContext) -> Result<()> {
    let groups = ctx.registry().group_by_category();
    println!("Symmetric:");
    for name in &groups.symmetric {
        println!("  {name}");
    }
    println!("Asymmetric:");
    for name in &groups.asymmetric {
        println!("  {name}");
    }
    println!("Other (AEAD):");
    for name in &groups.other {
        println!("  {name}");
    }
    println!("Hash:");
    for algorithm in HashAlgorithm::ALL {
        println!("  {:<10} {}", algorithm.name(), algorithm.description());
    }
    Ok(())
}

// ── `fenc config show` ────────────────────────────────────────────────────────

fn cmd_config_show(ctx: &FencContext, path: &Path) -> Result<()> {
    println!("# {}", path.display());
    println!("# keys dir resolves to {}", ctx.keys().dir().display());
    let rendered = toml::to_string_pretty(ctx.config()).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}
