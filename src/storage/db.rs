use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::errors::{Error, Result};
use crate::types::{now_ts, Email, Envelope, EnvelopeAddress, MailboxRecord};

/// Durable catalogue of mailboxes, emails and message->mailbox
/// memberships, backed by a single sqlite file.
///
/// Writers serialize on `write_lock`; readers go straight to the
/// connection pool and may observe any committed prefix. Every multi-row
/// mutator runs in one transaction.
pub struct Catalogue {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipRow {
    pub mailbox_name: String,
    pub uid: u32,
    pub our_id: Option<String>,
    pub pending_sync: bool,
}

impl Catalogue {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Catalogue(format!("creating data directory {}: {e}", parent.display()))
                })?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| Error::Catalogue(format!("connecting to sqlite at {}: {e}", path.display())))?;

        let catalogue = Catalogue {
            pool,
            write_lock: Mutex::new(()),
            path: path.to_path_buf(),
        };
        catalogue.migrate().await?;
        Ok(catalogue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email (
                our_id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                from_name_1 TEXT NOT NULL DEFAULT '',
                from_mailbox_1 TEXT NOT NULL DEFAULT '',
                from_host_1 TEXT NOT NULL DEFAULT '',
                sender_name_1 TEXT NOT NULL DEFAULT '',
                sender_mailbox_1 TEXT NOT NULL DEFAULT '',
                sender_host_1 TEXT NOT NULL DEFAULT '',
                reply_to_name_1 TEXT NOT NULL DEFAULT '',
                reply_to_mailbox_1 TEXT NOT NULL DEFAULT '',
                reply_to_host_1 TEXT NOT NULL DEFAULT '',
                to_name_1 TEXT NOT NULL DEFAULT '',
                to_mailbox_1 TEXT NOT NULL DEFAULT '',
                to_host_1 TEXT NOT NULL DEFAULT '',
                cc_name_1 TEXT NOT NULL DEFAULT '',
                cc_mailbox_1 TEXT NOT NULL DEFAULT '',
                cc_host_1 TEXT NOT NULL DEFAULT '',
                bcc_name_1 TEXT NOT NULL DEFAULT '',
                bcc_mailbox_1 TEXT NOT NULL DEFAULT '',
                bcc_host_1 TEXT NOT NULL DEFAULT '',
                in_reply_to TEXT NOT NULL DEFAULT '',
                envelope TEXT,
                flags TEXT NOT NULL DEFAULT '[]',
                text_content TEXT NOT NULL DEFAULT '',
                html_content TEXT NOT NULL DEFAULT '',
                attachments TEXT NOT NULL DEFAULT '[]',
                parse_warning TEXT NOT NULL DEFAULT '',
                parse_error TEXT NOT NULL DEFAULT '',
                mailboxes TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS message_to_mailbox (
                mailbox_name TEXT NOT NULL,
                uid INTEGER NOT NULL,
                our_id TEXT,
                pending_sync INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (mailbox_name, uid)
            );
            CREATE INDEX IF NOT EXISTS our_id_index ON message_to_mailbox (our_id);

            CREATE TABLE IF NOT EXISTS message_staging (
                mailbox_name TEXT NOT NULL,
                uid INTEGER NOT NULL,
                PRIMARY KEY (mailbox_name, uid)
            );

            CREATE TABLE IF NOT EXISTS mailbox (
                name TEXT PRIMARY KEY,
                attributes TEXT NOT NULL DEFAULT '[]',
                last_synced_at INTEGER NOT NULL DEFAULT 0,
                num_emails INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS persisted_frontend_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("running migrations: {e}")))?;

        self.create_fts_table().await?;
        Ok(())
    }

    async fn create_fts_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS email_fts USING fts5(
                our_id UNINDEXED,
                subject,
                text_content,
                from_name_1,
                from_mailbox_1,
                from_host_1
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("creating email_fts: {e}")))?;
        Ok(())
    }

    /// Upserts a mailbox and stamps `last_synced_at` with the current
    /// time. Workers call this at COMMIT_META. Idempotent.
    pub async fn save_mailbox(&self, record: &MailboxRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO mailbox (name, attributes, last_synced_at, num_emails)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                attributes = excluded.attributes,
                last_synced_at = excluded.last_synced_at;
            "#,
        )
        .bind(&record.name)
        .bind(encode_json(&record.attributes, "mailbox attributes")?)
        .bind(now_ts())
        .bind(record.num_emails)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("upserting mailbox: {e}")))?;
        Ok(())
    }

    /// Upserts a mailbox surfaced by server enumeration without touching
    /// `last_synced_at`, so "never synced" stays observable until a worker
    /// actually commits.
    pub async fn record_mailbox(&self, record: &MailboxRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO mailbox (name, attributes, last_synced_at, num_emails)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                attributes = excluded.attributes;
            "#,
        )
        .bind(&record.name)
        .bind(encode_json(&record.attributes, "mailbox attributes")?)
        .bind(record.last_synced_at)
        .bind(record.num_emails)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("recording mailbox: {e}")))?;
        Ok(())
    }

    pub async fn get_all_mailboxes(&self) -> Result<Vec<MailboxRecord>> {
        let rows = sqlx::query(
            "SELECT name, attributes, last_synced_at, num_emails FROM mailbox ORDER BY name;",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("loading mailboxes: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(MailboxRecord {
                name: row.get(0),
                attributes: decode_json(row.get::<String, _>(1).as_str(), "mailbox attributes")?,
                last_synced_at: row.get(2),
                num_emails: row.get(3),
            });
        }
        Ok(out)
    }

    /// Makes local membership for `mailbox` match the remote UID set, in
    /// one transaction:
    ///
    /// 1. replace the mailbox's staging rows with `remote_uids`;
    /// 2. delete memberships whose UID is no longer present remotely;
    /// 3. insert `pending_sync=1` rows for UIDs seen remotely but not
    ///    locally, preserving existing rows untouched;
    /// 4. clear the staging rows.
    ///
    /// The staging relation is empty for this mailbox before and after
    /// the call.
    pub async fn reconcile_mailbox(&self, mailbox: &str, remote_uids: &HashSet<u32>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = begin(&self.pool).await?;

        sqlx::query("DELETE FROM message_staging WHERE mailbox_name = ?1;")
            .bind(mailbox)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("truncating staging: {e}")))?;

        for uid in remote_uids {
            sqlx::query(
                "INSERT INTO message_staging (mailbox_name, uid) VALUES (?1, ?2) ON CONFLICT DO NOTHING;",
            )
            .bind(mailbox)
            .bind(*uid as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("staging remote uid: {e}")))?;
        }

        sqlx::query(
            r#"
            DELETE FROM message_to_mailbox
            WHERE mailbox_name = ?1
              AND uid NOT IN (SELECT uid FROM message_staging WHERE mailbox_name = ?1);
            "#,
        )
        .bind(mailbox)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Catalogue(format!("removing departed memberships: {e}")))?;

        for uid in remote_uids {
            sqlx::query(
                r#"
                INSERT INTO message_to_mailbox (mailbox_name, uid, our_id, pending_sync)
                VALUES (?1, ?2, NULL, 1)
                ON CONFLICT(mailbox_name, uid) DO NOTHING;
                "#,
            )
            .bind(mailbox)
            .bind(*uid as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("inserting pending membership: {e}")))?;
        }

        sqlx::query("DELETE FROM message_staging WHERE mailbox_name = ?1;")
            .bind(mailbox)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("clearing staging: {e}")))?;

        commit(tx).await
    }

    pub async fn get_pending_uids(&self, mailbox: &str) -> Result<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT uid FROM message_to_mailbox WHERE pending_sync = 1 AND mailbox_name = ?1 ORDER BY uid;",
        )
        .bind(mailbox)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("loading pending uids: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>(0) as u32)
            .collect())
    }

    /// Persists a parsed batch: upserts each email by fingerprint (first
    /// writer wins) and flips the matching membership rows to
    /// `pending_sync=0`, all in one transaction.
    pub async fn add_emails(&self, mailbox: &str, emails: &[Email]) -> Result<()> {
        if emails.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = begin(&self.pool).await?;

        for email in emails {
            let envelope_json = email
                .envelope
                .as_ref()
                .map(|envelope| encode_json(envelope, "envelope"))
                .transpose()?;
            let envelope = email.envelope.clone().unwrap_or_default();
            let from = envelope.first_from();
            let sender = envelope.first_sender();
            let reply_to = envelope.first_reply_to();
            let to = envelope.first_to();
            let cc = envelope.first_cc();
            let bcc = envelope.first_bcc();

            sqlx::query(
                r#"
                INSERT INTO email (
                    our_id, message_id, date, subject,
                    from_name_1, from_mailbox_1, from_host_1,
                    sender_name_1, sender_mailbox_1, sender_host_1,
                    reply_to_name_1, reply_to_mailbox_1, reply_to_host_1,
                    to_name_1, to_mailbox_1, to_host_1,
                    cc_name_1, cc_mailbox_1, cc_host_1,
                    bcc_name_1, bcc_mailbox_1, bcc_host_1,
                    in_reply_to, envelope, flags,
                    text_content, html_content, attachments,
                    parse_warning, parse_error, mailboxes
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                        ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)
                ON CONFLICT (our_id) DO NOTHING;
                "#,
            )
            .bind(&email.our_id)
            .bind(envelope.message_id.clone().unwrap_or_default())
            .bind(envelope.date.clone().unwrap_or_default())
            .bind(envelope.subject.clone().unwrap_or_default())
            .bind(from.name.unwrap_or_default())
            .bind(from.mailbox.unwrap_or_default())
            .bind(from.host.unwrap_or_default())
            .bind(sender.name.unwrap_or_default())
            .bind(sender.mailbox.unwrap_or_default())
            .bind(sender.host.unwrap_or_default())
            .bind(reply_to.name.unwrap_or_default())
            .bind(reply_to.mailbox.unwrap_or_default())
            .bind(reply_to.host.unwrap_or_default())
            .bind(to.name.unwrap_or_default())
            .bind(to.mailbox.unwrap_or_default())
            .bind(to.host.unwrap_or_default())
            .bind(cc.name.unwrap_or_default())
            .bind(cc.mailbox.unwrap_or_default())
            .bind(cc.host.unwrap_or_default())
            .bind(bcc.name.unwrap_or_default())
            .bind(bcc.mailbox.unwrap_or_default())
            .bind(bcc.host.unwrap_or_default())
            .bind(envelope.in_reply_to.clone().unwrap_or_default())
            .bind(envelope_json)
            .bind(encode_json(&email.flags, "flags")?)
            .bind(&email.text_body)
            .bind(&email.html_body)
            .bind(encode_json(&email.attachments, "attachments")?)
            .bind(&email.parse_warning)
            .bind(&email.parse_error)
            .bind(encode_json(&email.mailboxes, "mailboxes")?)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("inserting email: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO message_to_mailbox (mailbox_name, uid, our_id, pending_sync)
                VALUES (?1, ?2, ?3, 0)
                ON CONFLICT(mailbox_name, uid) DO UPDATE SET
                    our_id = excluded.our_id,
                    pending_sync = 0;
                "#,
            )
            .bind(mailbox)
            .bind(email.uid as i64)
            .bind(&email.our_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("marking membership synced: {e}")))?;
        }

        commit(tx).await
    }

    /// Recomputes the denormalized `email.mailboxes` list from synced
    /// membership rows and refreshes `mailbox.num_emails`.
    pub async fn recompute_membership_projection(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = begin(&self.pool).await?;

        sqlx::query(
            r#"
            UPDATE email
            SET mailboxes = (
                SELECT json_group_array(mailbox_name)
                FROM (
                    SELECT mailbox_name FROM message_to_mailbox
                    WHERE our_id = email.our_id AND pending_sync = 0
                    ORDER BY mailbox_name
                )
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Catalogue(format!("recomputing email mailboxes: {e}")))?;

        sqlx::query(
            r#"
            UPDATE mailbox
            SET num_emails = (
                SELECT COUNT(*) FROM message_to_mailbox
                WHERE mailbox_name = mailbox.name
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Catalogue(format!("recomputing mailbox counts: {e}")))?;

        commit(tx).await
    }

    /// Drops and repopulates the full-text index from the email table.
    /// HTML-only messages are indexed through a plain-text rendering so
    /// they remain searchable.
    pub async fn rebuild_fts(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        sqlx::query("DROP TABLE IF EXISTS email_fts;")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Catalogue(format!("dropping email_fts: {e}")))?;
        self.create_fts_table().await?;

        let rows = sqlx::query(
            r#"
            SELECT our_id, subject, text_content, html_content,
                   from_name_1, from_mailbox_1, from_host_1
            FROM email;
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("loading emails for fts: {e}")))?;

        let mut tx = begin(&self.pool).await?;
        for row in rows {
            let text: String = row.get(2);
            let html: String = row.get(3);
            let indexed = if text.trim().is_empty() && !html.trim().is_empty() {
                html_to_text(&html)
            } else {
                text
            };

            sqlx::query(
                r#"
                INSERT INTO email_fts (our_id, subject, text_content, from_name_1, from_mailbox_1, from_host_1)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6);
                "#,
            )
            .bind(row.get::<String, _>(0))
            .bind(row.get::<String, _>(1))
            .bind(indexed)
            .bind(row.get::<String, _>(4))
            .bind(row.get::<String, _>(5))
            .bind(row.get::<String, _>(6))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Catalogue(format!("indexing email: {e}")))?;
        }

        commit(tx).await
    }

    /// Runs a caller-supplied query returning email rows. The query must
    /// select from (or project the columns of) the `email` table.
    pub async fn query_emails(&self, sql: &str, params: &[String]) -> Result<Vec<Email>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Catalogue(format!("querying emails: {e}")))?;

        rows.iter().map(email_from_row).collect()
    }

    /// FTS5 match over subject, body text and the first from-address,
    /// returning emails whose matched fields carry snippet highlighting.
    pub async fn full_text_search(&self, term: &str) -> Result<Vec<Email>> {
        let rows = sqlx::query(
            r#"
            SELECT e.*,
                   snippet(email_fts, 1, '<b>', '</b>', '…', 16) AS subject_snippet,
                   snippet(email_fts, 2, '<b>', '</b>', '…', 32) AS text_snippet,
                   snippet(email_fts, 3, '<b>', '</b>', '…', 16) AS from_name_snippet,
                   snippet(email_fts, 4, '<b>', '</b>', '…', 16) AS from_mailbox_snippet,
                   snippet(email_fts, 5, '<b>', '</b>', '…', 16) AS from_host_snippet
            FROM email_fts
            JOIN email e ON e.our_id = email_fts.our_id
            WHERE email_fts MATCH ?1
            ORDER BY bm25(email_fts);
            "#,
        )
        .bind(term)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("full text search: {e}")))?;

        let mut out = Vec::new();
        for row in &rows {
            let mut email = email_from_row(row)?;
            email.text_body = row.get("text_snippet");
            let envelope = email.envelope.get_or_insert_with(Envelope::default);
            envelope.subject = Some(row.get("subject_snippet"));
            let highlighted = EnvelopeAddress {
                name: Some(row.get("from_name_snippet")),
                mailbox: Some(row.get("from_mailbox_snippet")),
                host: Some(row.get("from_host_snippet")),
            };
            match envelope.from.as_mut().and_then(|addrs| addrs.first_mut()) {
                Some(first) => *first = highlighted,
                None => envelope.from = Some(vec![highlighted]),
            }
            out.push(email);
        }
        Ok(out)
    }

    pub async fn set_frontend_state(&self, state: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO persisted_frontend_state (id, state)
            VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET state = excluded.state;
            "#,
        )
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("saving frontend state: {e}")))?;
        Ok(())
    }

    pub async fn get_frontend_state(&self) -> Result<String> {
        let row = sqlx::query("SELECT state FROM persisted_frontend_state WHERE id = 1;")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Catalogue(format!("loading frontend state: {e}")))?;
        Ok(row.map(|r| r.get(0)).unwrap_or_default())
    }

    pub async fn get_memberships(&self, mailbox: &str) -> Result<Vec<MembershipRow>> {
        let rows = sqlx::query(
            r#"
            SELECT mailbox_name, uid, our_id, pending_sync
            FROM message_to_mailbox
            WHERE mailbox_name = ?1
            ORDER BY uid;
            "#,
        )
        .bind(mailbox)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Catalogue(format!("loading memberships: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| MembershipRow {
                mailbox_name: row.get(0),
                uid: row.get::<i64, _>(1) as u32,
                our_id: row.get(2),
                pending_sync: row.get::<i64, _>(3) == 1,
            })
            .collect())
    }
}

fn email_from_row(row: &SqliteRow) -> Result<Email> {
    let text_body: String = try_column(row, "text_content")?;
    let html_body: String = try_column(row, "html_content")?;
    let envelope_json: Option<String> = try_column(row, "envelope")?;
    let envelope = match envelope_json.filter(|json| !json.is_empty()) {
        Some(json) => Some(decode_json(&json, "envelope")?),
        None => None,
    };

    Ok(Email {
        our_id: try_column(row, "our_id")?,
        uid: 0,
        mailbox: String::new(),
        envelope,
        flags: decode_json(&try_column::<String>(row, "flags")?, "flags")?,
        text_body,
        html_body,
        attachments: decode_json(&try_column::<String>(row, "attachments")?, "attachments")?,
        parse_warning: try_column(row, "parse_warning")?,
        parse_error: try_column(row, "parse_error")?,
        mailboxes: decode_json(&try_column::<String>(row, "mailboxes")?, "mailboxes")?,
    })
}

fn try_column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| Error::Catalogue(format!("reading column {name}: {e}")))
}

async fn begin(pool: &SqlitePool) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
    pool.begin()
        .await
        .map_err(|e| Error::Catalogue(format!("beginning transaction: {e}")))
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| Error::Catalogue(format!("committing transaction: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Catalogue(format!("encoding {what}: {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| Error::Catalogue(format!("decoding {what}: {e}")))
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80).unwrap_or_default()
}
