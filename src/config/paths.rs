//! Default locations for voxnote.
//!
//! Single source of truth for paths used when the config file leaves them
//! unset.
//!
//! | Location | Default | Purpose |
//! |----------|---------|---------|
//! | inbox    | `~/VoiceInbox` | Synced folder the recorder drops audio into |
//! | topics   | `~/Notes/Topics` | One `<topic>.md` notebook per topic |
//! | ledger   | `<data_dir>/voxnote/ledger.sqlite3` | Idempotency ledger |
//! | config   | `<config_dir>/voxnote/config.yaml` | User config file |

use std::path::PathBuf;

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Default inbox directory (~/VoiceInbox)
pub fn default_inbox() -> PathBuf {
    home().join("VoiceInbox")
}

/// Default notebook directory (~/Notes/Topics)
pub fn default_topics() -> PathBuf {
    home().join("Notes").join("Topics")
}

/// Default ledger database, under the platform data directory
pub fn default_ledger() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home().join(".local").join("share"))
        .join("voxnote")
        .join("ledger.sqlite3")
}

/// User config file location (~/.config/voxnote/config.yaml on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxnote").join("config.yaml"))
}
