//! JSON envelopes for entity payloads.
//!
//! Lists travel as `{ "<collection key>": [...], "revision": n }` and single
//! records as `{ "<record key>": {...}, "revision": n }`. The keys depend on
//! the entity kind, so these are built from `serde_json` maps rather than
//! fixed structs.

use serde_json::{Map, Value};

use crate::application::store::{Committed, Listing};
use crate::domain::{Entity, Revision};

const REVISION_KEY: &str = "revision";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing `{0}` in response body")]
    Missing(&'static str),
    #[error("malformed `{key}`: {message}")]
    Malformed { key: &'static str, message: String },
}

pub fn collection_envelope<E: Entity>(listing: &Listing<E>) -> Result<Value, serde_json::Error> {
    let mut body = Map::new();
    body.insert(
        E::KIND.collection_key().to_string(),
        serde_json::to_value(&listing.items)?,
    );
    body.insert(REVISION_KEY.to_string(), Value::from(listing.revision));
    Ok(Value::Object(body))
}

pub fn record_envelope<E: Entity>(
    entity: &E,
    revision: Option<Revision>,
) -> Result<Value, serde_json::Error> {
    let mut body = Map::new();
    body.insert(
        E::KIND.record_key().to_string(),
        serde_json::to_value(entity)?,
    );
    if let Some(revision) = revision {
        body.insert(REVISION_KEY.to_string(), Value::from(revision));
    }
    Ok(Value::Object(body))
}

pub fn committed_envelope<E: Entity>(
    committed: &Committed<E>,
) -> Result<Value, serde_json::Error> {
    record_envelope(&committed.entity, Some(committed.revision))
}

pub fn parse_collection<E: Entity>(mut body: Value) -> Result<Listing<E>, EnvelopeError> {
    let key = E::KIND.collection_key();
    let items = take(&mut body, key)?;
    let items = serde_json::from_value(items).map_err(|err| EnvelopeError::Malformed {
        key,
        message: err.to_string(),
    })?;
    Ok(Listing {
        items,
        revision: parse_revision(&body)?,
    })
}

pub fn parse_record<E: Entity>(mut body: Value) -> Result<(E, Option<Revision>), EnvelopeError> {
    let key = E::KIND.record_key();
    let record = take(&mut body, key)?;
    let entity = serde_json::from_value(record).map_err(|err| EnvelopeError::Malformed {
        key,
        message: err.to_string(),
    })?;
    let revision = body.get(REVISION_KEY).and_then(Value::as_u64);
    Ok((entity, revision))
}

pub fn parse_committed<E: Entity>(body: Value) -> Result<Committed<E>, EnvelopeError> {
    let revision = parse_revision(&body)?;
    let (entity, _) = parse_record(body)?;
    Ok(Committed { entity, revision })
}

fn take(body: &mut Value, key: &'static str) -> Result<Value, EnvelopeError> {
    body.as_object_mut()
        .and_then(|map| map.remove(key))
        .ok_or(EnvelopeError::Missing(key))
}

fn parse_revision(body: &Value) -> Result<Revision, EnvelopeError> {
    body.get(REVISION_KEY)
        .ok_or(EnvelopeError::Missing(REVISION_KEY))?
        .as_u64()
        .ok_or_else(|| EnvelopeError::Malformed {
            key: REVISION_KEY,
            message: "expected an unsigned integer".to_string(),
        })
}
