//! `searchgate token generate` — mint a client token from the CLI.

use chrono::Utc;

use sg_domain::config::Config;
use sg_domain::model::ClientToken;
use sg_store::{FileStore, Store};
use sg_vault::generate_client_token;

pub async fn generate(
    config: &Config,
    description: Option<String>,
    allowed_tools: Vec<String>,
    rate_limit: Option<u32>,
) -> sg_domain::Result<()> {
    let store = FileStore::open(&config.data_dir)?;

    let issued = generate_client_token();
    let record = ClientToken {
        id: uuid::Uuid::new_v4().to_string(),
        description,
        prefix: issued.prefix.clone(),
        secret_hash: issued.secret_hash.clone(),
        expires_at: None,
        revoked_at: None,
        allowed_tools: (!allowed_tools.is_empty()).then_some(allowed_tools),
        rate_limit,
        created_at: Utc::now(),
    };
    store.insert_token(record).await?;

    println!("token created (shown once, store it now):");
    println!("  {}", issued.token);
    println!("prefix: {}", issued.prefix);
    Ok(())
}
