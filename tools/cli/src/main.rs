//! Skiff CLI - Command line access to a storage session with vault support.
//!
//! Every command runs through a connection gate over a local directory
//! session. Paths inside an encrypted vault are transparently encrypted;
//! the vault is discovered and unlocked on first use.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use skiff_common::{Error, RemotePath, SensitiveBytes};
use skiff_crypto::KdfParams;
use skiff_pool::{ConnectionGate, GateConfig, RetryConfig, RetryExecutor};
use skiff_session::{stream_from_bytes, LocalSession, TransferStatus};
use skiff_vault::{PasswordCallback, PromptReason, Vault, VaultRegistry};

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Skiff - Storage sessions with encrypted vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Local directory the session is rooted at.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Maximum number of concurrent operations.
    #[arg(short, long, default_value_t = skiff_pool::gate::DEFAULT_MAX_TOTAL)]
    connections: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Create {
        /// Directory that becomes the vault root.
        path: String,

        /// KDF strength: "interactive", "moderate", "sensitive" or "low-memory".
        #[arg(short, long, default_value = "moderate")]
        strength: String,
    },

    /// List contents of a directory.
    Ls {
        /// Directory to list (default: root).
        #[arg(default_value = "/")]
        dir: String,
    },

    /// Create an empty file, keeping an existing one.
    Touch {
        /// File to create.
        file: String,
    },

    /// Upload a local file.
    Put {
        /// Source file on the local disk.
        source: PathBuf,

        /// Destination path.
        dest: String,
    },

    /// Download a file, optionally a byte range.
    Get {
        /// Source path.
        source: String,

        /// Destination file on the local disk.
        dest: PathBuf,

        /// First byte to download.
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to download (default: to the end).
        #[arg(long)]
        length: Option<u64>,
    },

    /// Remove files or empty directories.
    Rm {
        /// Paths to remove; a trailing '/' forces a directory.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Move or rename a file or directory.
    Mv {
        /// Current path.
        source: String,

        /// New path.
        target: String,
    },

    /// Create a directory.
    Mkdir {
        /// Directory path to create.
        dir: String,
    },

    /// Check whether a path exists.
    Exists {
        /// Path to check; a trailing '/' denotes a directory.
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let kdf_params = match &cli.command {
        Commands::Create { strength, .. } => {
            KdfParams::from_name(strength).context("Invalid strength")?
        }
        _ => KdfParams::default(),
    };

    let client = Client::connect(&cli.root, cli.connections, kdf_params)?;

    let result = match cli.command {
        Commands::Create { path, .. } => client.create(&path).await,
        Commands::Ls { dir } => client.list(&dir).await,
        Commands::Touch { file } => client.touch(&file).await,
        Commands::Put { source, dest } => client.put(&source, &dest).await,
        Commands::Get {
            source,
            dest,
            offset,
            length,
        } => client.get(&source, &dest, offset, length).await,
        Commands::Rm { paths } => client.remove(&paths).await,
        Commands::Mv { source, target } => client.rename(&source, &target).await,
        Commands::Mkdir { dir } => client.mkdir(&dir).await,
        Commands::Exists { path } => client.exists(&path).await,
    };

    client.gate.shutdown().await;
    result
}

/// Prompts for vault passphrases on the terminal.
struct TerminalPassword;

impl PasswordCallback for TerminalPassword {
    fn prompt(&self, root: &RemotePath, reason: PromptReason) -> skiff_common::Result<SensitiveBytes> {
        let password = rpassword::prompt_password(format!("{} {}: ", reason, root))?;

        if reason == PromptReason::Create {
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                return Err(Error::InvalidInput("Passwords do not match".to_string()));
            }
        }

        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }

        Ok(SensitiveBytes::new(password.into_bytes()))
    }
}

struct Client {
    gate: ConnectionGate,
    retry: RetryExecutor,
    cancel: CancellationToken,
}

impl Client {
    fn connect(root: &Path, connections: usize, kdf_params: KdfParams) -> Result<Self> {
        let session = LocalSession::new(root).context("Failed to open local session")?;
        let registry = Arc::new(VaultRegistry::new(Arc::new(TerminalPassword), kdf_params));
        let gate = ConnectionGate::new(
            Arc::new(session),
            registry,
            GateConfig::default().with_max_total(connections),
        )
        .context("Invalid connection limit")?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            gate,
            retry: RetryExecutor::new(RetryConfig::default()),
            cancel,
        })
    }

    /// Unlock the vault governing `path`, if any.
    async fn discover(&self, path: &RemotePath) -> Result<()> {
        let lease = self.gate.borrow(&self.cancel).await?;
        let result = self
            .gate
            .registry()
            .discover(&lease.native_capabilities(), path)
            .await;
        self.gate.release(lease, result.as_ref().err()).await;

        let vault = result.context("Failed to unlock vault")?;
        match vault.root() {
            Some(root) => debug!(root = %root, "Using vault"),
            None => debug!(path = %path, "No vault"),
        }
        Ok(())
    }

    /// Parse `raw`, asking the backend whether it names a file or a directory.
    async fn resolve(&self, raw: &str) -> Result<RemotePath> {
        if raw.ends_with('/') {
            let dir = RemotePath::directory(raw).context("Invalid path")?;
            self.discover(&dir).await?;
            return Ok(dir);
        }

        let file = RemotePath::file(raw).context("Invalid path")?;
        self.discover(&file).await?;
        let is_file = self
            .retry
            .execute(&self.gate, &self.cancel, |caps| {
                let file = file.clone();
                async move { caps.find()?.find(&file).await }
            })
            .await?;

        if is_file {
            Ok(file)
        } else {
            Ok(RemotePath::directory(raw)?)
        }
    }

    async fn create(&self, path: &str) -> Result<()> {
        let root = RemotePath::directory(path).context("Invalid vault path")?;
        info!("Creating new vault: {}", root);

        let lease = self.gate.borrow(&self.cancel).await?;
        let result = self
            .gate
            .registry()
            .create(&lease.native_capabilities(), &root)
            .await;
        self.gate.release(lease, result.as_ref().err()).await;
        result.context("Failed to create vault")?;

        println!("Vault created successfully!");
        println!("  Location: {}", root);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<()> {
        let dir = RemotePath::directory(dir).context("Invalid directory path")?;
        self.discover(&dir).await?;

        let entries = self
            .retry
            .execute(&self.gate, &self.cancel, |caps| {
                let dir = dir.clone();
                async move { caps.list()?.list(&dir).await }
            })
            .await
            .context("Failed to list directory")?;

        if entries.is_empty() {
            println!("Directory is empty.");
            return Ok(());
        }

        println!("Contents of {}:", dir);
        for entry in entries {
            let modified = entry.modified.format("%Y-%m-%d %H:%M");
            if entry.is_directory() {
                println!("  [DIR]  {}  {}/", modified, entry.name());
            } else {
                println!("  [FILE] {}  {} ({} bytes)", modified, entry.name(), entry.size);
            }
        }
        Ok(())
    }

    async fn touch(&self, file: &str) -> Result<()> {
        let file = RemotePath::file(file).context("Invalid file path")?;
        self.discover(&file).await?;

        let entry = self
            .gate
            .execute(&self.cancel, |caps| async move {
                caps.touch()?.touch(&file, &TransferStatus::new()).await
            })
            .await
            .context("Failed to create file")?;

        println!("Touched: {} ({} bytes)", entry.path, entry.size);
        Ok(())
    }

    async fn put(&self, source: &Path, dest: &str) -> Result<()> {
        info!("Uploading {} as {}", source.display(), dest);

        let dest = RemotePath::file(dest).context("Invalid destination path")?;
        let content = tokio::fs::read(source)
            .await
            .context("Failed to read source file")?;
        self.discover(&dest).await?;

        let entry = self
            .gate
            .execute(&self.cancel, |caps| async move {
                caps.write()?
                    .write(&dest, stream_from_bytes(content), &TransferStatus::new())
                    .await
            })
            .await
            .context("Failed to upload file")?;

        println!("File uploaded: {} ({} bytes)", entry.path, entry.size);
        Ok(())
    }

    async fn get(&self, source: &str, dest: &Path, offset: u64, length: Option<u64>) -> Result<()> {
        info!("Downloading {} to {}", source, dest.display());

        let source = RemotePath::file(source).context("Invalid source path")?;
        let mut status = TransferStatus::new().with_offset(offset);
        if let Some(length) = length {
            status = status.with_length(length);
        }
        self.discover(&source).await?;

        let written = self
            .retry
            .execute(&self.gate, &self.cancel, |caps| {
                let source = source.clone();
                let dest = dest.to_path_buf();
                async move {
                    let mut stream = caps.read()?.read(&source, &status).await?;
                    let mut out = tokio::fs::File::create(&dest).await?;
                    let mut written = 0u64;
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        out.write_all(&chunk).await?;
                        written += chunk.len() as u64;
                    }
                    out.flush().await?;
                    Ok::<_, Error>(written)
                }
            })
            .await
            .context("Failed to download file")?;

        println!("File downloaded: {} ({} bytes)", dest.display(), written);
        Ok(())
    }

    async fn remove(&self, raw: &[String]) -> Result<()> {
        let mut paths = Vec::with_capacity(raw.len());
        for path in raw {
            paths.push(self.resolve(path).await?);
        }

        self.gate
            .execute(&self.cancel, |caps| {
                let paths = paths.clone();
                async move { caps.delete()?.delete(&paths).await }
            })
            .await
            .context("Failed to remove")?;

        for path in &paths {
            println!("Removed: {}", path);
        }
        Ok(())
    }

    async fn rename(&self, source: &str, target: &str) -> Result<()> {
        let source = self.resolve(source).await?;
        let target = RemotePath::parse(target)
            .and_then(|target| target.with_kind(source.kind()))
            .context("Invalid target path")?;
        self.discover(&target).await?;

        let entry = self
            .gate
            .execute(&self.cancel, |caps| {
                let source = source.clone();
                async move { caps.rename()?.rename(&source, &target).await }
            })
            .await
            .context("Failed to move")?;

        println!("Moved: {} -> {}", source, entry.path);
        Ok(())
    }

    async fn mkdir(&self, dir: &str) -> Result<()> {
        info!("Creating directory: {}", dir);

        let dir = RemotePath::directory(dir).context("Invalid directory path")?;
        self.discover(&dir).await?;

        self.gate
            .execute(&self.cancel, |caps| {
                let dir = dir.clone();
                async move { caps.directory()?.mkdir(&dir).await }
            })
            .await
            .context("Failed to create directory")?;

        println!("Directory created: {}", dir);
        Ok(())
    }

    async fn exists(&self, raw: &str) -> Result<()> {
        let path = RemotePath::parse(raw).context("Invalid path")?;
        self.discover(&path).await?;

        let found = self
            .retry
            .execute(&self.gate, &self.cancel, |caps| {
                let path = path.clone();
                async move { caps.find()?.find(&path).await }
            })
            .await
            .context("Failed to look up path")?;

        if found {
            println!("{} exists", path);
        } else {
            println!("{} not found", path);
        }
        Ok(())
    }
}
