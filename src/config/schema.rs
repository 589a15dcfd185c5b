use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub youtube: YouTubeConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub line: LineConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub bot: BotConfig,
}

// ── YouTube ──────────────────────────────────────────────────────

/// YouTube Data API access. The API key covers read-only calls (search,
/// polling); posting goes through the OAuth credential in the token store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YouTubeConfig {
    #[serde(default)]
    pub api_key: String,
    /// Channel whose live streams the bot watches.
    #[serde(default)]
    pub channel_id: String,
}

// ── Gemini ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_temperature")]
    pub temperature: f64,
    #[serde(default = "default_gemini_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".into()
}

fn default_gemini_temperature() -> f64 {
    0.8
}

fn default_gemini_max_output_tokens() -> u32 {
    2048
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_gemini_model(),
            temperature: default_gemini_temperature(),
            max_output_tokens: default_gemini_max_output_tokens(),
        }
    }
}

// ── LINE ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    /// Channel secret used to sign webhook bodies (x-line-signature).
    #[serde(default)]
    pub channel_secret: String,
    /// Long-lived access token for the Messaging API.
    #[serde(default)]
    pub channel_access_token: String,
    /// User who receives admin notifications.
    #[serde(default)]
    pub admin_user_id: String,
    #[serde(default = "default_line_webhook_path")]
    pub webhook_path: String,
}

fn default_line_webhook_path() -> String {
    "/webhook/line".into()
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            channel_access_token: String::new(),
            admin_user_id: String::new(),
            webhook_path: default_line_webhook_path(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8700
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

// ── Bot loop ─────────────────────────────────────────────────────

/// What to do when discovery finds no active live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoSessionPolicy {
    /// Give up immediately and return to idle.
    #[default]
    Stop,
    /// Sleep `no_session_backoff_secs`, query once more, then give up.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_persona_name")]
    pub default_persona: String,
    /// Used when the platform omits pollingIntervalMillis.
    #[serde(default = "default_poll_fallback_secs")]
    pub poll_fallback_secs: u64,
    /// Sleep after a failed poll cycle before retrying.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Courtesy pause before posting an AI reply.
    #[serde(default = "default_reply_pause_secs")]
    pub reply_pause_secs: u64,
    #[serde(default)]
    pub no_session_policy: NoSessionPolicy,
    #[serde(default = "default_no_session_backoff_secs")]
    pub no_session_backoff_secs: u64,
}

fn default_persona_name() -> String {
    "default".into()
}

fn default_poll_fallback_secs() -> u64 {
    15
}

fn default_error_backoff_secs() -> u64 {
    60
}

fn default_reply_pause_secs() -> u64 {
    2
}

fn default_no_session_backoff_secs() -> u64 {
    300
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            default_persona: default_persona_name(),
            poll_fallback_secs: default_poll_fallback_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            reply_pause_secs: default_reply_pause_secs(),
            no_session_policy: NoSessionPolicy::default(),
            no_session_backoff_secs: default_no_session_backoff_secs(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let relay_dir = home.join(".liverelay");

        Self {
            workspace_dir: relay_dir.clone(),
            config_path: relay_dir.join("config.toml"),
            youtube: YouTubeConfig::default(),
            gemini: GeminiConfig::default(),
            line: LineConfig::default(),
            gateway: GatewayConfig::default(),
            bot: BotConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let relay_dir = home.join(".liverelay");
        let config_path = relay_dir.join("config.toml");

        if !relay_dir.exists() {
            fs::create_dir_all(&relay_dir).context("Failed to create .liverelay directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path.clone();
            config.workspace_dir = relay_dir;
            config.apply_env_overrides();
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.workspace_dir = relay_dir;
            config.save()?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LIVERELAY_YOUTUBE_API_KEY") {
            if !key.is_empty() {
                self.youtube.api_key = key;
            }
        }
        if let Ok(id) = std::env::var("LIVERELAY_YOUTUBE_CHANNEL_ID") {
            if !id.is_empty() {
                self.youtube.channel_id = id;
            }
        }
        if let Ok(key) = std::env::var("LIVERELAY_GEMINI_API_KEY") {
            if !key.is_empty() {
                self.gemini.api_key = key;
            }
        }
        if let Ok(secret) = std::env::var("LIVERELAY_LINE_CHANNEL_SECRET") {
            if !secret.is_empty() {
                self.line.channel_secret = secret;
            }
        }
        if let Ok(token) = std::env::var("LIVERELAY_LINE_ACCESS_TOKEN") {
            if !token.is_empty() {
                self.line.channel_access_token = token;
            }
        }
        if let Ok(admin) = std::env::var("LIVERELAY_LINE_ADMIN_USER_ID") {
            if !admin.is_empty() {
                self.line.admin_user_id = admin;
            }
        }

        // Gateway port: LIVERELAY_GATEWAY_PORT or PORT (deploy platforms set PORT)
        if let Ok(port_str) =
            std::env::var("LIVERELAY_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        if let Ok(host) = std::env::var("LIVERELAY_GATEWAY_HOST").or_else(|_| std::env::var("HOST"))
        {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }

        if let Ok(workspace) = std::env::var("LIVERELAY_WORKSPACE") {
            if !workspace.is_empty() {
                self.workspace_dir = PathBuf::from(workspace);
            }
        }
    }

    /// Directory holding `<name>.toml` persona files.
    pub fn personas_dir(&self) -> PathBuf {
        self.workspace_dir.join("personas")
    }

    /// The persisted YouTube OAuth credential.
    pub fn token_path(&self) -> PathBuf {
        self.workspace_dir.join("youtube_token.json")
    }

    /// Registry of LINE users who followed the bot.
    pub fn users_path(&self) -> PathBuf {
        self.workspace_dir.join("line_users.json")
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path).with_context(|| {
                format!(
                    "Failed to create config backup before atomic replace: {}",
                    backup_path.display()
                )
            })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            if had_existing_config && backup_path.exists() {
                let _ = fs::copy(&backup_path, &self.config_path);
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path);
        }

        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    let dir = File::open(path)
        .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_sane_values() {
        let c = Config::default();
        assert_eq!(c.gemini.model, "gemini-1.5-flash");
        assert!((c.gemini.temperature - 0.8).abs() < f64::EPSILON);
        assert_eq!(c.bot.default_persona, "default");
        assert_eq!(c.bot.poll_fallback_secs, 15);
        assert_eq!(c.bot.error_backoff_secs, 60);
        assert_eq!(c.bot.no_session_policy, NoSessionPolicy::Stop);
        assert_eq!(c.gateway.host, "127.0.0.1");
        assert_eq!(c.line.webhook_path, "/webhook/line");
        assert!(c.config_path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn workspace_paths_derive_from_workspace_dir() {
        let mut c = Config::default();
        c.workspace_dir = PathBuf::from("/tmp/relay-test");
        assert_eq!(c.personas_dir(), PathBuf::from("/tmp/relay-test/personas"));
        assert_eq!(
            c.token_path(),
            PathBuf::from("/tmp/relay-test/youtube_token.json")
        );
        assert_eq!(
            c.users_path(),
            PathBuf::from("/tmp/relay-test/line_users.json")
        );
    }

    #[test]
    fn config_toml_round_trip() {
        let mut c = Config::default();
        c.youtube.channel_id = "UC123".into();
        c.bot.no_session_policy = NoSessionPolicy::Retry;
        c.bot.no_session_backoff_secs = 120;

        let toml_str = toml::to_string_pretty(&c).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.youtube.channel_id, "UC123");
        assert_eq!(parsed.bot.no_session_policy, NoSessionPolicy::Retry);
        assert_eq!(parsed.bot.no_session_backoff_secs, 120);
    }

    #[test]
    fn no_session_policy_parses_lowercase() {
        let c: BotConfig = toml::from_str(r#"no_session_policy = "retry""#).unwrap();
        assert_eq!(c.no_session_policy, NoSessionPolicy::Retry);
        let c: BotConfig = toml::from_str(r#"no_session_policy = "stop""#).unwrap();
        assert_eq!(c.no_session_policy, NoSessionPolicy::Stop);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[youtube]
api_key = "k"
channel_id = "UCabc"
"#,
        )
        .unwrap();
        assert_eq!(parsed.youtube.api_key, "k");
        assert_eq!(parsed.gemini.max_output_tokens, 2048);
        assert_eq!(parsed.bot.reply_pause_secs, 2);
    }

    #[test]
    fn save_writes_config_and_removes_temp_files() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut c = Config::default();
        c.config_path = config_path.clone();
        c.workspace_dir = dir.path().to_path_buf();

        c.save().unwrap();
        assert!(config_path.exists());

        // Save over an existing file exercises the backup/replace path.
        c.youtube.channel_id = "UCxyz".into();
        c.save().unwrap();

        let reloaded: Config = toml::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(reloaded.youtube.channel_id, "UCxyz");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty(), "temp files must not survive save");
    }

    #[test]
    fn env_override_gateway_port() {
        // Dedicated var name to avoid clashing with parallel tests.
        unsafe {
            std::env::set_var("LIVERELAY_GATEWAY_PORT", "9911");
        }
        let mut c = Config::default();
        c.apply_env_overrides();
        assert_eq!(c.gateway.port, 9911);
        unsafe {
            std::env::remove_var("LIVERELAY_GATEWAY_PORT");
        }
    }
}
