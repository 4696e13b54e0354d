//! twilight: Twilight encrypted video library CLI
//!
//! Commands:
//!   keys init                         - generate CEK + MEK and seal them under a password
//!   keys unlock [--handshake URL]     - unlock the keyring, optionally install the CEK in a proxy
//!   encrypt <in> <out>                - encrypt a media file into the counter-block wire form
//!   decrypt <in> <out>                - decrypt a wire-form file
//!   meta encrypt|decrypt <text>       - encrypt or decrypt a metadata string with the MEK
//!   config show                       - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use twilight_core::config::TwilightConfig;
use twilight_core::keyring::{JsonKeyringStore, KeyringStore};
use twilight_core::types::{ClientMessage, KeyKind};
use twilight_crypto::{
    decrypt_metadata, encrypt_metadata, generate_cek, generate_mek, seal_keyring, unlock_keyring,
    ContentKey, CryptoError, DecryptTransform, EncryptTransform, KdfParams, UnlockedKeyring,
};

const CHUNK_SIZE: usize = 256 * 1024;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "twilight",
    version,
    about = "Twilight encrypted video library client",
    long_about = "twilight: manage the password-sealed keyring, encrypt media, and hand keys to the decrypting proxy"
)]
struct Cli {
    /// Path to twilight.toml configuration file
    #[arg(long, short = 'c', env = "TWILIGHT_CONFIG", default_value = "/etc/twilight/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Keyring management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Encrypt a file with the content key
    ///
    /// Output layout: 16-byte counter block, then ciphertext of the same
    /// length as the input.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt a file produced by `twilight encrypt`
    Decrypt {
        input: PathBuf,
        output: PathBuf,
    },

    /// Metadata string encryption with the metadata key
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// Generate a new content key and metadata key and seal them under a password
    Init {
        /// Replace an existing keyring (its keys become unrecoverable)
        #[arg(long)]
        force: bool,
    },

    /// Unlock the keyring and verify the password
    Unlock {
        /// Proxy handshake endpoint, e.g. http://127.0.0.1:8787/_twilight/handshake
        #[arg(long, requires = "session")]
        handshake: Option<String>,

        /// Session id the proxy should bind the content key to
        #[arg(long, env = "TWILIGHT_SESSION")]
        session: Option<String>,

        /// Print the content key as a JWK (sensitive)
        #[arg(long)]
        print_jwk: bool,
    },
}

#[derive(Subcommand, Debug)]
enum MetaAction {
    /// Encrypt a string, printing base64
    Encrypt { text: String },
    /// Decrypt a base64 string produced by `meta encrypt`
    Decrypt { text: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Keys { action: KeysAction::Init { force } } => cmd_keys_init(&config, force),
        Commands::Keys {
            action: KeysAction::Unlock { handshake, session, print_jwk },
        } => cmd_keys_unlock(&config, handshake.as_deref(), session.as_deref(), print_jwk).await,
        Commands::Encrypt { input, output } => cmd_encrypt(&config, &input, &output).await,
        Commands::Decrypt { input, output } => cmd_decrypt(&config, &input, &output).await,
        Commands::Meta { action } => cmd_meta(&config, action),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("TWILIGHT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<TwilightConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(TwilightConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

fn open_store(config: &TwilightConfig) -> Result<JsonKeyringStore> {
    let path = expand_tilde(&config.keyring.path);
    JsonKeyringStore::open(&path).with_context(|| format!("opening keyring store {}", path.display()))
}

// ── Password + progress helpers ───────────────────────────────────────────────

/// Password from TWILIGHT_PASSWORD, else an interactive prompt.
fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(password) = std::env::var("TWILIGHT_PASSWORD") {
        return Ok(SecretString::from(password));
    }

    let password = rpassword::prompt_password("Keyring password: ").context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ").context("reading password")?;
        if password != again {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(password))
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
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

fn describe_crypto_error(e: CryptoError) -> anyhow::Error {
    match e {
        CryptoError::AuthenticationFailed => anyhow::anyhow!("incorrect password (or corrupted keyring)"),
        other => other.into(),
    }
}

/// Unlock the configured user's keyring, persisting a freshly generated MEK
/// if the keyring did not have one yet.
fn unlock(config: &TwilightConfig) -> Result<UnlockedKeyring> {
    let mut store = open_store(config)?;
    let user = config.keyring.user_id.as_str();

    let ring = store
        .load(user)?
        .with_context(|| format!("no keyring for user {user}; run `twilight keys init` first"))?;

    let password = read_password(false)?;
    let params = KdfParams::from(&config.crypto);

    let pb = make_spinner("unlock");
    pb.set_message("deriving key encryption key (Argon2id)");
    let unlocked = unlock_keyring(&ring, &password, &params);
    pb.finish_and_clear();
    let unlocked = unlocked.map_err(describe_crypto_error)?;

    if let Some(envelope) = unlocked.sealed_metadata_key.clone() {
        store.save_envelope(user, KeyKind::Metadata, envelope)?;
        info!(user, "generated and saved a metadata key");
    }
    Ok(unlocked)
}

// ── `twilight keys init` ──────────────────────────────────────────────────────

fn cmd_keys_init(config: &TwilightConfig, force: bool) -> Result<()> {
    let mut store = open_store(config)?;
    let user = config.keyring.user_id.as_str();

    if store.load(user)?.is_some() && !force {
        anyhow::bail!(
            "a keyring for user {user} already exists in {}; pass --force to replace it",
            store.path().display()
        );
    }

    let password = read_password(true)?;
    let params = KdfParams::from(&config.crypto);
    let cek = generate_cek();
    let mek = generate_mek();

    let pb = make_spinner("init");
    pb.set_message("sealing keys (Argon2id)");
    let ring = seal_keyring(user, &password, &cek, &mek, &params);
    pb.finish_and_clear();
    let ring = ring?;

    for kind in [KeyKind::Content, KeyKind::Metadata] {
        if let Some(envelope) = ring.envelope(kind) {
            store.save_envelope(user, kind, envelope.clone())?;
        }
    }

    println!("keyring created for {user} in {}", store.path().display());
    Ok(())
}

// ── `twilight keys unlock` ────────────────────────────────────────────────────

async fn cmd_keys_unlock(
    config: &TwilightConfig,
    handshake: Option<&str>,
    session: Option<&str>,
    print_jwk: bool,
) -> Result<()> {
    let unlocked = unlock(config)?;
    println!("keyring unlocked for {}", config.keyring.user_id);

    if print_jwk {
        println!("{}", serde_json::to_string(&unlocked.cek.to_jwk())?);
    }

    if let (Some(url), Some(session)) = (handshake, session) {
        send_handshake(config, url, session, &unlocked.cek).await?;
        println!("content key installed in proxy for session {session}");
    }
    Ok(())
}

async fn send_handshake(config: &TwilightConfig, url: &str, session: &str, cek: &ContentKey) -> Result<()> {
    let message = ClientMessage::SetKey { key: cek.to_jwk() };
    let response = reqwest::Client::new()
        .post(url)
        .header(config.proxy.session_header.as_str(), session)
        .json(&message)
        .send()
        .await
        .with_context(|| format!("sending handshake to {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("proxy rejected handshake ({status}): {body}");
    }
    Ok(())
}

// ── `twilight encrypt` / `twilight decrypt` ───────────────────────────────────

async fn cmd_encrypt(config: &TwilightConfig, input: &Path, output: &Path) -> Result<()> {
    let unlocked = unlock(config)?;
    let bytes = encrypt_file(unlocked.cek, input, output).await?;
    println!("encrypted {bytes} bytes -> {}", output.display());
    Ok(())
}

async fn cmd_decrypt(config: &TwilightConfig, input: &Path, output: &Path) -> Result<()> {
    let unlocked = unlock(config)?;
    let bytes = decrypt_file(unlocked.cek, input, output).await?;
    println!("decrypted {bytes} bytes -> {}", output.display());
    Ok(())
}

/// Temp file next to `output` that is renamed over it once writing succeeds.
/// Refuses paths where writing would clobber `input` before it has been read.
fn staging_path(input: &Path, output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .with_context(|| format!("output {} has no file name", output.display()))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".part");
    let tmp = output.with_file_name(tmp_name);

    let source = resolve(input);
    if source == resolve(output) {
        anyhow::bail!("input and output are the same file: {}", input.display());
    }
    if source == resolve(&tmp) {
        anyhow::bail!("input {} collides with the temporary output file", input.display());
    }
    Ok(tmp)
}

/// Absolute form of `path`, also for files that do not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(path) = std::fs::canonicalize(path) {
        return path;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// Stream `input` through the encrypt transform into `output`. Returns the
/// plaintext length.
async fn encrypt_file(key: ContentKey, input: &Path, output: &Path) -> Result<u64> {
    let tmp = staging_path(input, output)?;
    let mut reader = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let total = reader.metadata().await?.len();

    let mut writer = tokio::io::BufWriter::new(
        tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?,
    );

    let pb = make_progress_bar(total, "encrypt");
    let mut transform = EncryptTransform::new(key);
    writer.write_all(transform.counter_block().as_bytes()).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&transform.push(&buf[..n])?).await?;
        written += n as u64;
        pb.inc(n as u64);
    }
    writer.write_all(&transform.finish()?).await?;
    writer.flush().await?;
    drop(writer);

    tokio::fs::rename(&tmp, output)
        .await
        .with_context(|| format!("renaming {} -> {}", tmp.display(), output.display()))?;
    pb.finish_with_message("done".to_string());
    Ok(written)
}

/// Stream a wire-form file through the decrypt transform. Returns the
/// plaintext length.
async fn decrypt_file(key: ContentKey, input: &Path, output: &Path) -> Result<u64> {
    let tmp = staging_path(input, output)?;
    let mut reader = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let total = reader.metadata().await?.len();

    let mut writer = tokio::io::BufWriter::new(
        tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?,
    );

    let pb = make_progress_bar(total, "decrypt");
    let mut transform = DecryptTransform::new(key);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let plaintext = transform.push(&buf[..n])?;
        written += plaintext.len() as u64;
        writer.write_all(&plaintext).await?;
        pb.inc(n as u64);
    }
    let tail = transform.finish()?;
    written += tail.len() as u64;
    writer.write_all(&tail).await?;
    writer.flush().await?;
    drop(writer);

    if transform.is_truncated() {
        warn!(path = %input.display(), "input shorter than the 16-byte header; output is empty");
    }

    tokio::fs::rename(&tmp, output)
        .await
        .with_context(|| format!("renaming {} -> {}", tmp.display(), output.display()))?;
    pb.finish_with_message("done".to_string());
    Ok(written)
}

// ── `twilight meta` ───────────────────────────────────────────────────────────

fn cmd_meta(config: &TwilightConfig, action: MetaAction) -> Result<()> {
    let unlocked = unlock(config)?;
    let out = match action {
        MetaAction::Encrypt { text } => encrypt_metadata(&unlocked.mek, &text)?,
        MetaAction::Decrypt { text } => decrypt_metadata(&unlocked.mek, &text).map_err(describe_crypto_error)?,
    };
    println!("{out}");
    Ok(())
}

// ── `twilight config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &TwilightConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/.local/share/twilight/keyring.json")),
            PathBuf::from(home).join(".local/share/twilight/keyring.json")
        );
        assert_eq!(expand_tilde(Path::new("/etc/twilight")), PathBuf::from("/etc/twilight"));
    }

    #[test]
    fn test_cli_parses_unlock_with_handshake() {
        let cli = Cli::try_parse_from([
            "twilight",
            "keys",
            "unlock",
            "--handshake",
            "http://127.0.0.1:8787/_twilight/handshake",
            "--session",
            "s1",
        ])
        .unwrap();
        match cli.command {
            Commands::Keys {
                action: KeysAction::Unlock { handshake, session, print_jwk },
            } => {
                assert!(handshake.is_some());
                assert_eq!(session.as_deref(), Some("s1"));
                assert!(!print_jwk);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("clip.mp4");
        let sealed = tmp.path().join("clip.mp4.enc");
        let restored = tmp.path().join("clip.out.mp4");

        let content: Vec<u8> = (0..(CHUNK_SIZE + 1234)).map(|i| (i % 241) as u8).collect();
        std::fs::write(&plain, &content).unwrap();

        let key = generate_cek();
        assert_eq!(encrypt_file(key.clone(), &plain, &sealed).await.unwrap(), content.len() as u64);
        assert_eq!(std::fs::metadata(&sealed).unwrap().len(), content.len() as u64 + 16);

        assert_eq!(decrypt_file(key, &sealed, &restored).await.unwrap(), content.len() as u64);
        assert_eq!(std::fs::read(&restored).unwrap(), content);
    }

    #[tokio::test]
    async fn test_decrypt_truncated_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let sealed = tmp.path().join("short.enc");
        let restored = tmp.path().join("short.out");
        std::fs::write(&sealed, [1u8, 2, 3]).unwrap();

        assert_eq!(decrypt_file(generate_cek(), &sealed, &restored).await.unwrap(), 0);
        assert!(std::fs::read(&restored).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_part_suffixed_input_survives_encrypt() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("clip.part");
        let sealed = tmp.path().join("clip.enc");
        let restored = tmp.path().join("clip.out");
        let content = vec![7u8; 1000];
        std::fs::write(&plain, &content).unwrap();

        let key = generate_cek();
        assert_eq!(encrypt_file(key.clone(), &plain, &sealed).await.unwrap(), 1000);
        assert_eq!(std::fs::read(&plain).unwrap(), content);
        assert!(!tmp.path().join("clip.enc.part").exists());

        decrypt_file(key, &sealed, &restored).await.unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), content);
    }

    #[tokio::test]
    async fn test_colliding_paths_are_refused() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("clip.enc.part");
        let content = vec![3u8; 100];
        std::fs::write(&plain, &content).unwrap();

        let err = encrypt_file(generate_cek(), &plain, &tmp.path().join("clip.enc")).await.unwrap_err();
        assert!(err.to_string().contains("temporary output"), "{err}");

        let err = decrypt_file(generate_cek(), &plain, &plain).await.unwrap_err();
        assert!(err.to_string().contains("same file"), "{err}");

        assert_eq!(std::fs::read(&plain).unwrap(), content);
    }
}
