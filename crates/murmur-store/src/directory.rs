//! Contacts, marketplace products, spaces, wallet transactions and stories.
//!
//! These are plain list/create records mirrored from the backend; the chat
//! core only needs to read and append them.

use chrono::{DateTime, Utc};
use rusqlite::params;

use murmur_shared::models::{Contact, Product, Space, Story, TransactionDirection, WalletTransaction};
use murmur_shared::types::UserId;

use crate::database::{conversion_err, fmt_ts, parse_ts, Database};
use crate::error::Result;

impl Database {
    // -- Contacts -----------------------------------------------------------

    /// Insert or refresh a contact.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (id, name, avatar, about, is_bot) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name, avatar = excluded.avatar,
                 about = excluded.about, is_bot = excluded.is_bot",
            params![
                contact.id.as_str(),
                contact.name,
                contact.avatar,
                contact.about,
                contact.is_bot
            ],
        )?;
        Ok(())
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, avatar, about, is_bot FROM contacts ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Contact {
                id: UserId(row.get(0)?),
                name: row.get(1)?,
                avatar: row.get(2)?,
                about: row.get(3)?,
                is_bot: row.get(4)?,
            })
        })?;
        collect(rows)
    }

    // -- Products -----------------------------------------------------------

    pub fn insert_product(&self, product: &Product) -> Result<()> {
        self.conn().execute(
            "INSERT INTO products (id, seller_id, title, description, price, currency, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                product.id,
                product.seller.as_str(),
                product.title,
                product.description,
                product.price,
                product.currency,
                product.image_url,
                fmt_ts(product.created_at),
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn list_products(&self) -> Result<Vec<Product>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, seller_id, title, description, price, currency, image_url, created_at
             FROM products ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let created: String = row.get(7)?;
            Ok(Product {
                id: row.get(0)?,
                seller: UserId(row.get(1)?),
                title: row.get(2)?,
                description: row.get(3)?,
                price: row.get(4)?,
                currency: row.get(5)?,
                image_url: row.get(6)?,
                created_at: parse_ts(7, &created)?,
            })
        })?;
        collect(rows)
    }

    // -- Spaces -------------------------------------------------------------

    pub fn insert_space(&self, space: &Space) -> Result<()> {
        self.conn().execute(
            "INSERT INTO spaces (id, name, description, member_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                space.id,
                space.name,
                space.description,
                space.member_count,
                fmt_ts(space.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_spaces(&self) -> Result<Vec<Space>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, description, member_count, created_at
             FROM spaces ORDER BY member_count DESC, name",
        )?;
        let rows = stmt.query_map([], |row| {
            let created: String = row.get(4)?;
            Ok(Space {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                member_count: row.get(3)?,
                created_at: parse_ts(4, &created)?,
            })
        })?;
        collect(rows)
    }

    // -- Wallet -------------------------------------------------------------

    pub fn insert_transaction(&self, tx: &WalletTransaction) -> Result<()> {
        let direction = match tx.direction {
            TransactionDirection::Incoming => "incoming",
            TransactionDirection::Outgoing => "outgoing",
        };
        self.conn().execute(
            "INSERT INTO wallet_transactions (id, counterparty_id, amount, currency, direction, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx.id,
                tx.counterparty.as_str(),
                tx.amount,
                tx.currency,
                direction,
                tx.note,
                fmt_ts(tx.created_at),
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn list_transactions(&self) -> Result<Vec<WalletTransaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, counterparty_id, amount, currency, direction, note, created_at
             FROM wallet_transactions ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let direction: String = row.get(4)?;
            let created: String = row.get(6)?;
            Ok(WalletTransaction {
                id: row.get(0)?,
                counterparty: UserId(row.get(1)?),
                amount: row.get(2)?,
                currency: row.get(3)?,
                direction: parse_direction(4, &direction)?,
                note: row.get(5)?,
                created_at: parse_ts(6, &created)?,
            })
        })?;
        collect(rows)
    }

    // -- Stories ------------------------------------------------------------

    pub fn insert_story(&self, story: &Story) -> Result<()> {
        self.conn().execute(
            "INSERT INTO stories (id, author_id, media_url, caption, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                story.id,
                story.author.as_str(),
                story.media_url,
                story.caption,
                fmt_ts(story.created_at),
                fmt_ts(story.expires_at),
            ],
        )?;
        Ok(())
    }

    /// Stories that have not yet expired at `now`, oldest first.
    pub fn list_active_stories(&self, now: DateTime<Utc>) -> Result<Vec<Story>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, author_id, media_url, caption, created_at, expires_at
             FROM stories WHERE expires_at > ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![fmt_ts(now)], |row| {
            let created: String = row.get(4)?;
            let expires: String = row.get(5)?;
            Ok(Story {
                id: row.get(0)?,
                author: UserId(row.get(1)?),
                media_url: row.get(2)?,
                caption: row.get(3)?,
                created_at: parse_ts(4, &created)?,
                expires_at: parse_ts(5, &expires)?,
            })
        })?;
        collect(rows)
    }
}

pub(crate) fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn parse_direction(idx: usize, value: &str) -> rusqlite::Result<TransactionDirection> {
    match value {
        "incoming" => Ok(TransactionDirection::Incoming),
        "outgoing" => Ok(TransactionDirection::Outgoing),
        other => Err(conversion_err(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown direction `{other}`"),
            ),
        )),
    }
}
