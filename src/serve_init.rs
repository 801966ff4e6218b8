//! Purpose: Generate the service signing key for `pdsview serve init`.
//! Exports: `ServeInitConfig`, `ServeInitResult`, `init`.
//! Invariants: Key material is never printed; only paths and commands are returned.
//! Invariants: An existing key file is never overwritten unless `force` is set.

use std::path::{Path, PathBuf};

use pdsview::api::{Error, ErrorKind, generate_signing_key};

#[derive(Debug)]
pub struct ServeInitConfig {
    pub key_file: PathBuf,
    pub aggregator_url: String,
    pub aggregator_did: String,
    pub force: bool,
}

#[derive(Debug)]
pub struct ServeInitResult {
    pub key_file: String,
    pub server_commands: Vec<String>,
    pub overwrote_existing: bool,
}

pub fn init(config: ServeInitConfig) -> Result<ServeInitResult, Error> {
    let key_file = absolutize(&config.key_file)?;
    let existed = key_file.exists();
    if existed && !config.force {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message(format!(
                "signing key file {} already exists",
                key_file.display()
            ))
            .with_hint("Re-run with --force to overwrite or choose a different --key-file."));
    }

    if let Some(parent) = key_file.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("failed to create {}", parent.display()))
                .with_source(err)
        })?;
    }

    let key = generate_signing_key()?;
    std::fs::write(&key_file, format!("{key}\n")).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to write {}", key_file.display()))
            .with_source(err)
    })?;

    let key_display = key_file.display().to_string();
    let serve_cmd = format!(
        "pdsview serve --aggregator-url {} --aggregator-did {} --signing-key-file {} --proxy-reads",
        quote_for_shell(&config.aggregator_url),
        quote_for_shell(&config.aggregator_did),
        quote_for_shell(&key_display),
    );
    let check_cmd = format!(
        "pdsview serve --aggregator-url {} --aggregator-did {} --signing-key-file {} --proxy-reads check",
        quote_for_shell(&config.aggregator_url),
        quote_for_shell(&config.aggregator_did),
        quote_for_shell(&key_display),
    );

    Ok(ServeInitResult {
        key_file: key_display,
        server_commands: vec![check_cmd, serve_cmd],
        overwrote_existing: existed,
    })
}

fn absolutize(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to resolve current directory")
            .with_source(err)
    })?;
    Ok(cwd.join(path))
}

fn quote_for_shell(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:=@".contains(ch))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::{ServeInitConfig, init, quote_for_shell};
    use pdsview::api::{ErrorKind, read_signing_key};

    fn config(dir: &std::path::Path, force: bool) -> ServeInitConfig {
        ServeInitConfig {
            key_file: dir.join("keys").join("signing.key"),
            aggregator_url: "https://appview.test".to_string(),
            aggregator_did: "did:web:appview.test".to_string(),
            force,
        }
    }

    #[test]
    fn writes_a_readable_key_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = init(config(dir.path(), false)).expect("init");
        assert!(!result.overwrote_existing);
        let key = read_signing_key(std::path::Path::new(&result.key_file)).expect("key");
        assert_eq!(key.len(), 32);
        assert!(result.server_commands[1].contains("--proxy-reads"));

        let err = init(config(dir.path(), false)).expect_err("exists");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let again = init(config(dir.path(), true)).expect("forced");
        assert!(again.overwrote_existing);
        let rotated = read_signing_key(std::path::Path::new(&again.key_file)).expect("key");
        assert_ne!(key, rotated);
    }

    #[test]
    fn shell_quoting_only_wraps_when_needed() {
        assert_eq!(quote_for_shell("/tmp/signing.key"), "/tmp/signing.key");
        assert_eq!(quote_for_shell("/tmp/my key"), "'/tmp/my key'");
        assert_eq!(quote_for_shell("it's"), "'it'\"'\"'s'");
    }
}
