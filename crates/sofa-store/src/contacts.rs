//! CRUD operations for [`Contact`] records.

use rusqlite::{params, OptionalExtension};

use sofa_shared::{Address, PeerId};

use crate::database::{conversion_error, parse_timestamp, timestamp, Database};
use crate::error::Result;
use crate::models::Contact;

impl Database {
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (peer_id, payment_address, language, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(peer_id) DO UPDATE SET
                 payment_address = excluded.payment_address,
                 language = excluded.language,
                 updated_at = excluded.updated_at",
            params![
                contact.peer_id.as_str(),
                contact.payment_address.as_str(),
                contact.language,
                timestamp(&contact.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, peer_id: &PeerId) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT peer_id, payment_address, language, updated_at
                 FROM contacts WHERE peer_id = ?1",
                params![peer_id.as_str()],
                row_to_contact,
            )
            .optional()?)
    }

    /// The most recently updated contact using `address`.
    pub fn contact_by_address(&self, address: &Address) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT peer_id, payment_address, language, updated_at
                 FROM contacts WHERE payment_address = ?1
                 ORDER BY updated_at DESC
                 LIMIT 1",
                params![address.as_str()],
                row_to_contact,
            )
            .optional()?)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let peer_str: String = row.get(0)?;
    let address_str: String = row.get(1)?;
    let language: String = row.get(2)?;
    let updated_str: String = row.get(3)?;

    Ok(Contact {
        peer_id: PeerId::new(peer_str).map_err(|e| conversion_error(0, e))?,
        payment_address: Address::parse(&address_str).map_err(|e| conversion_error(1, e))?,
        language,
        updated_at: parse_timestamp(3, &updated_str)?,
    })
}
