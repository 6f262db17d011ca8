//! Login and logout command handlers.

use std::io::{self, IsTerminal, Read, Write};

use anyhow::{Result, bail};
use tracing::info;

use crate::client::EsoArchive;

pub async fn run_login_command(
    archive: &EsoArchive,
    username: Option<String>,
    store_password: bool,
) -> Result<()> {
    // A password on stdin (piped) wins; otherwise fall back to the stored
    // credential, prompting only when neither is available.
    let password = read_piped_password()?;

    let result = archive
        .login(username.as_deref(), password.as_deref(), store_password)
        .await;

    if let Err(crate::client::ArchiveError::PasswordRequired { username }) = &result {
        info!(username = %username, "no stored password found");
        let prompted = prompt_password()?;
        archive
            .login(Some(username.as_str()), Some(&prompted), store_password)
            .await?;
        info!("logged in");
        return Ok(());
    }

    result?;
    info!("logged in");
    Ok(())
}

pub async fn run_logout_command(archive: &EsoArchive, forget: bool) -> Result<()> {
    archive.logout(forget).await?;
    info!("logged out");
    Ok(())
}

fn read_piped_password() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        bail!("no password provided on stdin");
    }
    Ok(Some(trimmed.to_string()))
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let password = line.trim();
    if password.is_empty() {
        bail!("no password provided");
    }
    Ok(password.to_string())
}
