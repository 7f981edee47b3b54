// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dacc_contracts::{
    ActionReceiver, KeyEvent, KeyValue, Keystore, RegistryError, RegistryErrorKind,
    SessionActions, WatchEvent, WatchStream,
};
use dacc_types::{Session, SessionAction, SessionActionKind, SessionActionRequest};

use crate::codec::{decode, encode};
use crate::keys;

/// Action channel carried over the keystore
///
/// A request is written under the handling host's prefix; the result comes
/// back under its own key, which the sender watches from before the request
/// is written.
#[derive(Clone)]
pub struct KeystoreSessionActions {
    keystore: Arc<dyn Keystore>,
}

fn decode_request(kv: &KeyValue) -> Option<SessionActionRequest> {
    match decode(kv) {
        Ok(request) => Some(request),
        Err(e) => {
            tracing::warn!(key = %kv.key, "ignoring action request: {e}");
            None
        }
    }
}

impl KeystoreSessionActions {
    pub fn new(keystore: Arc<dyn Keystore>) -> Self {
        Self { keystore }
    }
}

#[async_trait]
impl SessionActions for KeystoreSessionActions {
    async fn send_session_action(
        &self,
        kind: SessionActionKind,
        session: &Session,
    ) -> Result<ActionReceiver, RegistryError> {
        let host = &session.primary_brick_host;
        if host.is_empty() {
            return Err(RegistryError::new(
                RegistryErrorKind::InvalidInput,
                format!("no host available to handle {kind:?} for session: {}", session.name),
            ));
        }

        let request = SessionActionRequest {
            id: Uuid::new_v4().to_string(),
            kind,
            session: session.clone(),
        };
        let result_key = keys::action_result(&request.id);

        let cancel = CancellationToken::new();
        let mut results = self
            .keystore
            .watch(&result_key, false, cancel.clone())
            .await?;
        if let Err(e) = self
            .keystore
            .put(
                &keys::action(host, &session.name, &request.id),
                encode(&request)?,
                None,
            )
            .await
        {
            cancel.cancel();
            return Err(e);
        }
        tracing::info!(session = %session.name, host = %host, action = ?kind, id = %request.id, "action dispatched");

        let (mut tx, rx) = oneshot::channel();
        let keystore = self.keystore.clone();
        tokio::spawn(async move {
            let _stop_watch = cancel.drop_guard();
            let result = loop {
                tokio::select! {
                    _ = tx.closed() => break None,
                    event = results.next() => match event {
                        Some(KeyEvent::Created(kv)) | Some(KeyEvent::Updated { new: kv, .. }) => {
                            match decode::<SessionAction>(&kv) {
                                Ok(result) => break Some(result),
                                Err(e) => {
                                    tracing::warn!(key = %kv.key, "unreadable action result: {e}");
                                    break None;
                                }
                            }
                        }
                        Some(KeyEvent::Deleted(_)) => continue,
                        None => break None,
                    },
                }
            };

            if let Some(result) = result {
                let _ = tx.send(result);
                if let Err(e) = keystore.delete(&result_key).await {
                    tracing::debug!(key = %result_key, "unable to remove action result: {e}");
                }
            }
        });

        Ok(rx)
    }

    async fn watch_action_requests(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<SessionActionRequest>, RegistryError> {
        let prefix = keys::host_actions(hostname);
        let mut events = self.keystore.watch(&prefix, true, cancel).await?;
        let pending = self.keystore.get_all(&prefix).await?;

        Ok(Box::pin(async_stream::stream! {
            let mut seen = HashSet::new();
            for kv in &pending {
                if let Some(request) = decode_request(kv)
                    && seen.insert(request.id.clone())
                {
                    yield WatchEvent::Created(request);
                }
            }

            while let Some(event) = events.next().await {
                match event {
                    KeyEvent::Created(kv) => {
                        if let Some(request) = decode_request(&kv)
                            && seen.insert(request.id.clone())
                        {
                            yield WatchEvent::Created(request);
                        }
                    }
                    KeyEvent::Deleted(kv) => {
                        if let Some(request) = decode_request(&kv) {
                            seen.remove(&request.id);
                        }
                    }
                    KeyEvent::Updated { .. } => {}
                }
            }
        }))
    }

    async fn complete_action(
        &self,
        request: &SessionActionRequest,
        result: SessionAction,
    ) -> Result<(), RegistryError> {
        self.keystore
            .put(&keys::action_result(&request.id), encode(&result)?, None)
            .await?;
        self.keystore
            .delete(&keys::action(
                &request.session.primary_brick_host,
                &request.session.name,
                &request.id,
            ))
            .await?;
        tracing::info!(
            session = %request.session.name,
            action = ?request.kind,
            success = result.is_success(),
            "action completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeystore;
    use dacc_types::VolumeRequest;

    fn session(host: &str) -> Session {
        let mut session = Session::new("job1", VolumeRequest::default());
        session.primary_brick_host = host.to_string();
        session
    }

    #[tokio::test]
    async fn result_reaches_the_sender() {
        let actions = KeystoreSessionActions::new(Arc::new(MemoryKeystore::new()));
        let cancel = CancellationToken::new();
        let mut requests = actions
            .watch_action_requests("host1", cancel.clone())
            .await
            .unwrap();

        let rx = actions
            .send_session_action(SessionActionKind::CreateFilesystem, &session("host1"))
            .await
            .unwrap();

        let Some(WatchEvent::Created(request)) = requests.next().await else {
            panic!("expected a request");
        };
        assert_eq!(request.kind, SessionActionKind::CreateFilesystem);
        actions
            .complete_action(
                &request,
                SessionAction::failure(request.kind, "job1", "fake"),
            )
            .await
            .unwrap();

        let result = rx.await.unwrap();
        assert_eq!(result.error, "fake");
        cancel.cancel();
    }

    #[tokio::test]
    async fn pending_requests_are_delivered_once() {
        let actions = KeystoreSessionActions::new(Arc::new(MemoryKeystore::new()));
        let _rx = actions
            .send_session_action(SessionActionKind::Delete, &session("host1"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut requests = actions
            .watch_action_requests("host1", cancel.clone())
            .await
            .unwrap();
        assert!(matches!(requests.next().await, Some(WatchEvent::Created(r)) if r.kind == SessionActionKind::Delete));

        cancel.cancel();
        assert!(requests.next().await.is_none());
    }

    #[tokio::test]
    async fn sessions_without_a_host_cannot_be_dispatched() {
        let actions = KeystoreSessionActions::new(Arc::new(MemoryKeystore::new()));
        let err = actions
            .send_session_action(SessionActionKind::Delete, &session(""))
            .await
            .unwrap_err();
        assert!(err.is(RegistryErrorKind::InvalidInput));
    }
}
