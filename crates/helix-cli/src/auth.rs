use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use helix_core::DerivedBytesProvider;
use rpassword::read_password;
use secrecy::SecretString;

/// Where the secrets for a pair come from.
#[derive(Clone, Default)]
pub struct CredentialOptions {
    pub password: Option<String>,
    pub password_stdin: bool,
    pub key_files: Vec<PathBuf>,
}

/// Prompt for the password without echoing it.
///
/// For non-interactive use, pass `--password` or set `HELIX_PASSWORD`.
pub fn prompt_password(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    let password = read_password()?;
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

/// Prompt twice and require both entries to match.
pub fn prompt_new_password() -> Result<String> {
    let first = prompt_password("New password: ")?;
    let second = prompt_password("Confirm password: ")?;
    if first != second {
        bail!("Passwords do not match");
    }
    Ok(first)
}

fn read_password_from_stdin() -> Result<String> {
    if io::stdin().is_terminal() {
        bail!(
            "--password-stdin requires the password to be piped in.\n\
             Example: echo \"$SECRET\" | helix --password-stdin sync @docs"
        );
    }
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\n', '\r']);
    if password.is_empty() {
        bail!("Password from stdin is empty");
    }
    Ok(password.to_string())
}

/// Resolve the password, prompting only when no key file can stand in for it.
fn resolve_password(opts: &CredentialOptions, key_files: &[PathBuf], creating: bool) -> Result<Option<String>> {
    if opts.password_stdin {
        return read_password_from_stdin().map(Some);
    }
    if let Some(password) = &opts.password {
        return Ok(Some(password.clone()));
    }
    if !key_files.is_empty() {
        return Ok(None);
    }
    let password = if creating {
        prompt_new_password()?
    } else {
        prompt_password("Password: ")?
    };
    Ok(Some(password))
}

/// Build the key provider from a password and any key files.
///
/// `extra_key_file` comes from a configured pair and is used alongside `--key-file`.
pub fn provider(
    opts: &CredentialOptions,
    extra_key_file: Option<&PathBuf>,
    creating: bool,
) -> Result<Arc<DerivedBytesProvider>> {
    let mut key_files = opts.key_files.clone();
    key_files.extend(extra_key_file.cloned());

    let password = resolve_password(opts, &key_files, creating)?.map(SecretString::from);
    let provider = DerivedBytesProvider::from_secrets(password.as_ref(), &key_files)
        .context("Failed to load credentials")?;
    Ok(Arc::new(provider))
}
