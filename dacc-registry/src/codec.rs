// SPDX-License-Identifier: GPL-3.0-only

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use dacc_contracts::{
    KeyEvent, KeyEventStream, KeyValue, RegistryError, RegistryErrorKind, WatchEvent, WatchStream,
};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RegistryError> {
    serde_json::to_vec(value)
        .map_err(|e| RegistryError::new(RegistryErrorKind::Serialization, e.to_string()))
}

pub fn decode<T: DeserializeOwned>(kv: &KeyValue) -> Result<T, RegistryError> {
    serde_json::from_slice(&kv.value).map_err(|e| {
        RegistryError::new(
            RegistryErrorKind::Serialization,
            format!("unable to decode {}: {e}", kv.key),
        )
    })
}

pub fn decode_event<T: DeserializeOwned>(event: &KeyEvent) -> Result<WatchEvent<T>, RegistryError> {
    Ok(match event {
        KeyEvent::Created(kv) => WatchEvent::Created(decode(kv)?),
        KeyEvent::Updated { old, new } => WatchEvent::Updated {
            old: decode(old)?,
            new: decode(new)?,
        },
        KeyEvent::Deleted(kv) => WatchEvent::Deleted(decode(kv)?),
    })
}

/// Decode a raw event stream; records that fail to decode are logged and skipped
pub fn typed_events<T>(events: KeyEventStream) -> WatchStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    Box::pin(events.filter_map(|event| async move {
        match decode_event(&event) {
            Ok(typed) => Some(typed),
            Err(e) => {
                tracing::warn!(key = %event.key(), "skipping watch event: {e}");
                None
            }
        }
    }))
}
