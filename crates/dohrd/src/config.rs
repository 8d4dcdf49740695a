use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe counts as a known identity.
    pub match_threshold: f32,
    /// Sampling interval of the detection loop.
    pub tick_interval: Duration,
    /// Hard cap on one tick's async chain, so a hung downstream call
    /// cannot stall the overlap guard forever.
    pub tick_timeout: Duration,
    /// Trailing entrance-dedup window.
    pub dedup_window: chrono::Duration,
    /// Minimum gap between two unknown-visitor cues.
    pub unknown_cooldown: Duration,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Average luma below which a frame is too dark to be worth an
    /// inference pass.
    pub min_luma: f32,

    // Playback cue (all-or-nothing: the leg exists only with credentials).
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub spotify_refresh_token: Option<String>,
    /// Device to wake when nothing is actively playing.
    pub spotify_device_id: Option<String>,

    // Notification relays; each is independently optional.
    pub slack_webhook_url: Option<String>,
    pub telegram_api_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Synthesized greeting.
    pub speech_api_key: Option<String>,
    pub speech_endpoint: String,
    pub speech_model: String,
    pub speech_voice: String,

    // Local audio output.
    pub player_command: String,
    pub player_args: Vec<String>,
    pub chime_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `DOHR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("dohr");

        let db_path = std::env::var("DOHR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("dohr.db"));

        let model_dir = std::env::var("DOHR_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            camera_device: std::env::var("DOHR_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            match_threshold: env_f32("DOHR_MATCH_THRESHOLD", dohr_core::MATCH_DISTANCE_THRESHOLD),
            tick_interval: Duration::from_millis(env_u64("DOHR_TICK_INTERVAL_MS", 300)),
            tick_timeout: Duration::from_secs(env_u64("DOHR_TICK_TIMEOUT_SECS", 30)),
            dedup_window: chrono::Duration::hours(env_u64("DOHR_DEDUP_WINDOW_HOURS", 24) as i64),
            unknown_cooldown: Duration::from_secs(env_u64("DOHR_UNKNOWN_COOLDOWN_SECS", 60)),
            warmup_frames: env_usize("DOHR_WARMUP_FRAMES", 4),
            min_luma: env_f32("DOHR_MIN_LUMA", 16.0),

            spotify_client_id: env_opt("DOHR_SPOTIFY_CLIENT_ID"),
            spotify_client_secret: env_opt("DOHR_SPOTIFY_CLIENT_SECRET"),
            spotify_refresh_token: env_opt("DOHR_SPOTIFY_REFRESH_TOKEN"),
            spotify_device_id: env_opt("DOHR_SPOTIFY_DEVICE_ID"),

            slack_webhook_url: env_opt("DOHR_SLACK_WEBHOOK_URL"),
            telegram_api_token: env_opt("DOHR_TELEGRAM_API_TOKEN"),
            telegram_chat_id: env_opt("DOHR_TELEGRAM_CHAT_ID"),

            speech_api_key: env_opt("DOHR_SPEECH_API_KEY"),
            speech_endpoint: std::env::var("DOHR_SPEECH_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            speech_model: std::env::var("DOHR_SPEECH_MODEL").unwrap_or_else(|_| "tts-1".to_string()),
            speech_voice: std::env::var("DOHR_SPEECH_VOICE").unwrap_or_else(|_| "alloy".to_string()),

            player_command: std::env::var("DOHR_PLAYER_COMMAND")
                .unwrap_or_else(|_| "mpg123".to_string()),
            player_args: std::env::var("DOHR_PLAYER_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|_| vec!["-q".to_string()]),
            chime_path: env_opt("DOHR_CHIME_PATH").map(PathBuf::from),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("ultraface-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("mobilefacenet-128.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
