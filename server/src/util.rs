//! Shared atomic-write helper: every durable file this server owns (secret,
//! notifications, user records) is written temp-then-rename so a crash
//! mid-write never leaves a half-written file in place.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

/// Decodes the base64 payload carried by client WebSocket `stdin` messages.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    B64.decode(data)
}

pub fn write_atomically(path: &Path, bytes: &[u8], mode: u32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        use std::io::Write;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
