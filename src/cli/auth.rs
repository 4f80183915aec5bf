//! Interactive Drive authorization.

use crate::global;
use crate::storage::auth::{self, ClientSecret};
use anyhow::{Context, Result};

pub async fn handle_auth_command() -> Result<()> {
    let secret_path = global::client_secret_file()?;
    let secret = ClientSecret::load(&secret_path).with_context(|| {
        format!(
            "Failed to load OAuth client secret from {:?}. Download an installed-app \
             credential from the Google Cloud console and place it there.",
            secret_path
        )
    })?;

    let http = reqwest::Client::new();
    let token = auth::interactive_flow(&http, &secret).await?;

    let token_path = global::token_file()?;
    auth::save_token(&token_path, &token)?;
    println!("Authorization complete. Credential saved to {:?}", token_path);

    Ok(())
}
