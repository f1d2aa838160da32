//! Encrypted credential storage using SQLite.

use super::{encryption::Sealed, parse_scopes, Credential, CredentialStore, TokenCipher};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Credential store backed by SQLite, tokens sealed with AES-256-GCM.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     subject_id TEXT PRIMARY KEY,
///     access_token TEXT NOT NULL,        -- Sealed
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,                -- Sealed (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT,                   -- RFC 3339 (optional)
///     scopes TEXT NOT NULL,              -- space separated
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// The connection sits behind a `Mutex`; SQLite gives each statement ACID
/// semantics, so an upsert never leaves a half-written row.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl SqliteCredentialStore {
    /// Opens (or creates) the store at `db_path`. `":memory:"` works for tests.
    pub fn open<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open credential database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                subject_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, subject_id: &str) -> Result<Option<Credential>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       expires_at, scopes
                FROM credentials
                WHERE subject_id = ?1
                "#,
                params![subject_id],
                |row| {
                    Ok((
                        Sealed {
                            ciphertext: row.get(0)?,
                            nonce: row.get(1)?,
                        },
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read credentials")?;

        let Some((access, refresh, refresh_nonce, expires_at, scopes)) = row else {
            return Ok(None);
        };

        let access_token = self
            .cipher
            .open(&access)
            .context("Failed to decrypt access token")?;

        let refresh_token = match (refresh, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                self.cipher
                    .open(&Sealed { ciphertext, nonce })
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Some(Credential {
            subject_id: subject_id.to_string(),
            access_token,
            refresh_token,
            expires_at,
            scopes: parse_scopes(&scopes),
        }))
    }

    fn upsert(&self, credential: &Credential) -> Result<()> {
        let access = self
            .cipher
            .seal(&credential.access_token)
            .context("Failed to encrypt access token")?;

        let refresh = credential
            .refresh_token
            .as_deref()
            .map(|token| self.cipher.seal(token))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let (refresh_token, refresh_nonce) = match refresh {
            Some(sealed) => (Some(sealed.ciphertext), Some(sealed.nonce)),
            None => (None, None),
        };

        let expires_at = credential.expires_at.map(|dt| dt.to_rfc3339());
        let scopes = credential
            .scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    subject_id,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, scopes, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(subject_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    scopes = excluded.scopes,
                    updated_at = excluded.updated_at
                "#,
                params![
                    credential.subject_id,
                    access.ciphertext,
                    access.nonce,
                    refresh_token,
                    refresh_nonce,
                    expires_at,
                    scopes,
                    now,
                ],
            )
            .context("Failed to store credentials")?;

        Ok(())
    }

    fn delete(&self, subject_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE subject_id = ?1",
                params![subject_id],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }
}
