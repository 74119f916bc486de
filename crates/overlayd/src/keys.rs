//! Identity loading.
//!
//! Each `[[keys]]` entry is a hex-encoded Ed25519 private key on disk. A
//! missing file is generated on first run (mode 0600 on unix); an empty
//! path means an ephemeral identity for this run only.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

use overlay_core::config::KeyConfig;
use overlay_core::crypto::Keypair;

/// Load or generate every configured key, by alias.
pub fn load_all(keys: &[KeyConfig]) -> Result<HashMap<String, Arc<Keypair>>> {
    let mut out = HashMap::new();
    for key in keys {
        if out.contains_key(&key.alias) {
            bail!("key alias '{}' configured twice", key.alias);
        }
        let keypair = load_or_generate(key)
            .with_context(|| format!("failed to load key '{}'", key.alias))?;
        tracing::info!(
            alias = %key.alias,
            public_key = hex::encode(keypair.public),
            "identity ready"
        );
        out.insert(key.alias.clone(), Arc::new(keypair));
    }
    Ok(out)
}

pub fn load_or_generate(key: &KeyConfig) -> Result<Keypair> {
    if key.file.as_os_str().is_empty() {
        tracing::info!(alias = %key.alias, "using ephemeral identity");
        return Ok(Keypair::generate());
    }
    if key.file.exists() {
        return read_key(&key.file);
    }
    let keypair = Keypair::generate();
    write_key(&key.file, &keypair)?;
    tracing::info!(alias = %key.alias, path = %key.file.display(), "generated new identity");
    Ok(keypair)
}

fn read_key(path: &Path) -> Result<Keypair> {
    let text = Zeroizing::new(
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?,
    );
    let bytes = Zeroizing::new(hex::decode(text.trim()).context("key file is not hex")?);
    let Ok(private) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("key file holds {} bytes, expected 32", bytes.len());
    };
    Ok(Keypair::from_private(private))
}

fn write_key(path: &Path, keypair: &Keypair) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;

    let text = Zeroizing::new(hex::encode(&*keypair.private_bytes()));
    file.write_all(text.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
