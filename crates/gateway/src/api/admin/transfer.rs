//! Key export and import.
//!
//! The export document carries decrypted secrets (it exists for
//! migration between deployments), so both directions are admin-only and
//! audited. Imports auto-rename on label collision instead of failing
//! the batch.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use sg_domain::error::Error;
use sg_domain::model::{AuditRow, BraveKey, CallOutcome, TavilyKey};
use sg_vault::mask_secret;

use super::guard::AdminGuard;
use super::{audit, store_error};
use crate::state::AppState;

/// Upper bound on `"label (import N)"` rename attempts per entry.
const RENAME_ATTEMPTS: usize = 50;

pub const SCHEMA_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub tavily: Vec<ExportedKey>,
    #[serde(default)]
    pub brave: Vec<ExportedKey>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKey {
    pub label: String,
    pub api_key: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub renamed: Vec<RenamedKey>,
    pub failed: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedKey {
    pub from: String,
    pub to: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn export_keys(State(state): State<AppState>, guard: AdminGuard) -> Response {
    let (tavily_keys, brave_keys) = match (
        state.store.list_tavily_keys().await,
        state.store.list_brave_keys().await,
    ) {
        (Ok(t), Ok(b)) => (t, b),
        (Err(e), _) | (_, Err(e)) => return store_error(e),
    };

    let mut document = ExportDocument {
        schema_version: SCHEMA_VERSION,
        exported_at: Utc::now(),
        tavily: Vec::with_capacity(tavily_keys.len()),
        brave: Vec::with_capacity(brave_keys.len()),
    };
    for key in tavily_keys {
        match state.vault.decrypt(&key.ciphertext) {
            Ok(api_key) => document.tavily.push(ExportedKey {
                label: key.label,
                api_key,
            }),
            Err(e) => return store_error(e),
        }
    }
    for key in brave_keys {
        match state.vault.decrypt(&key.ciphertext) {
            Ok(api_key) => document.brave.push(ExportedKey {
                label: key.label,
                api_key,
            }),
            Err(e) => return store_error(e),
        }
    }

    audit(
        &state,
        &guard,
        AuditRow::new("keys.export", CallOutcome::Success).details(json!({
            "tavily": document.tavily.len(),
            "brave": document.brave.len(),
        })),
    )
    .await;
    Json(document).into_response()
}

pub async fn import_keys(
    State(state): State<AppState>,
    guard: AdminGuard,
    Json(document): Json<ExportDocument>,
) -> Response {
    if document.schema_version != SCHEMA_VERSION {
        return super::api_error(
            axum::http::StatusCode::BAD_REQUEST,
            format!(
                "unsupported schemaVersion {} (expected {SCHEMA_VERSION})",
                document.schema_version
            ),
        );
    }

    let mut report = ImportReport::default();

    for entry in &document.tavily {
        let outcome = import_one(&state, entry, true).await;
        tally(&mut report, entry, outcome);
    }
    for entry in &document.brave {
        let outcome = import_one(&state, entry, false).await;
        tally(&mut report, entry, outcome);
    }

    audit(
        &state,
        &guard,
        AuditRow::new("keys.import", CallOutcome::Success).details(json!({
            "imported": report.imported,
            "renamed": report.renamed.len(),
            "failed": report.failed.len(),
        })),
    )
    .await;
    Json(report).into_response()
}

fn tally(report: &mut ImportReport, entry: &ExportedKey, outcome: Result<Option<String>, Error>) {
    match outcome {
        Ok(None) => report.imported += 1,
        Ok(Some(new_label)) => {
            report.imported += 1;
            report.renamed.push(RenamedKey {
                from: entry.label.clone(),
                to: new_label,
            });
        }
        Err(e) => report
            .failed
            .push(format!("{}: {e}", entry.label)),
    }
}

/// Insert one imported key, renaming `L` to `L (import N)` on collision.
/// Returns the new label when a rename happened.
async fn import_one(
    state: &AppState,
    entry: &ExportedKey,
    is_tavily: bool,
) -> Result<Option<String>, Error> {
    let ciphertext = state.vault.encrypt(&entry.api_key)?;
    let masked = mask_secret(&entry.api_key);

    for attempt in 0..RENAME_ATTEMPTS {
        let label = if attempt == 0 {
            entry.label.clone()
        } else {
            format!("{} (import {})", entry.label, attempt + 1)
        };

        let result = if is_tavily {
            state
                .store
                .insert_tavily_key(TavilyKey::new(&label, ciphertext.clone(), masked.clone()))
                .await
        } else {
            state
                .store
                .insert_brave_key(BraveKey::new(&label, ciphertext.clone(), masked.clone()))
                .await
        };

        match result {
            Ok(()) => return Ok((attempt > 0).then_some(label)),
            Err(Error::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(Error::Conflict(format!(
        "label \"{}\" could not be made unique after {RENAME_ATTEMPTS} attempts",
        entry.label
    )))
}
