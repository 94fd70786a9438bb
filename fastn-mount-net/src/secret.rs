/// File name of the daemon's secret key inside the home directory.
pub const KEY_FILE: &str = "daemon.key";

/// Reads the daemon's secret key from `dir`, or creates a new one.
///
/// The key is stored as 32 raw bytes in [`KEY_FILE`]. A file of any other
/// length is treated as corrupt and reported instead of being overwritten, so
/// the peer identity never changes silently.
///
/// # Errors
///
/// Returns an error if the key file cannot be read, is malformed, or a new
/// key cannot be written.
#[tracing::instrument]
pub async fn read_or_create_key(dir: &std::path::Path) -> eyre::Result<iroh::SecretKey> {
    let key_file = dir.join(KEY_FILE);

    match tokio::fs::read(&key_file).await {
        Ok(bytes) => {
            let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                eyre::eyre!(
                    "{} holds {} bytes, expected 32",
                    key_file.display(),
                    bytes.len()
                )
            })?;
            let secret_key = iroh::SecretKey::from_bytes(&bytes);
            tracing::info!("Loaded existing key: {}", secret_key.public());
            Ok(secret_key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No existing key found, generating new one");
            let bytes: [u8; 32] = rand::random();
            let secret_key = iroh::SecretKey::from_bytes(&bytes);

            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&key_file, bytes).await?;
            tracing::info!("Generated and saved new key: {}", secret_key.public());

            Ok(secret_key)
        }
        Err(e) => Err(eyre::eyre!("failed to read {}: {e}", key_file.display())),
    }
}
