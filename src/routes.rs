//! Inbound routes: the thin adapter between a request router and the engine.
//!
//! Clients call `sync.subscribe` and `sync.unsubscribe`, each declaring the
//! protocol version they speak. A mismatching version is refused before the
//! engine is touched.

use crate::connections::Connection;
use crate::engine::{SyncEngine, PROTOCOL_VERSION};
use crate::error::{Result, SyncError};
use crate::types::{Params, SubscriptionId, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Route name for subscribing.
pub const SUBSCRIBE_ROUTE: &str = "sync.subscribe";

/// Route name for unsubscribing.
pub const UNSUBSCRIBE_ROUTE: &str = "sync.unsubscribe";

/// Payload of `sync.subscribe`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub version: Option<String>,
    /// Id of a subscription to resume, if the client had one.
    #[serde(default)]
    pub id: Option<SubscriptionId>,
    pub publication: String,
    #[serde(default)]
    pub params: Option<Params>,
}

/// Payload of `sync.unsubscribe`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(default)]
    pub version: Option<String>,
    pub id: SubscriptionId,
}

/// Refuse clients speaking another protocol version.
pub fn check_version(version: Option<&str>) -> Result<()> {
    match version {
        Some(v) if v == PROTOCOL_VERSION => Ok(()),
        other => {
            let client = other.unwrap_or("none").to_string();
            tracing::warn!(
                client_version = %client,
                server_version = PROTOCOL_VERSION,
                "client sync version is incompatible"
            );
            Err(SyncError::VersionIncompatible {
                client,
                server: PROTOCOL_VERSION.to_string(),
            })
        }
    }
}

/// The sync routes, bound to one engine.
#[derive(Clone)]
pub struct SyncRoutes {
    engine: SyncEngine,
}

impl SyncRoutes {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn subscribe(
        &self,
        user: &User,
        connection: Arc<dyn Connection>,
        request: SubscribeRequest,
    ) -> Result<SubscriptionId> {
        check_version(request.version.as_deref())?;
        self.engine.subscribe(
            user,
            connection,
            request.id.as_ref(),
            &request.publication,
            request.params.unwrap_or_default(),
        )
    }

    pub fn unsubscribe(&self, user: &User, request: UnsubscribeRequest) -> Result<()> {
        check_version(request.version.as_deref())?;
        self.engine.unsubscribe(user, &request.id)
    }

    /// Dispatch a raw JSON call by route name.
    ///
    /// `sync.subscribe` answers with the subscription id, `sync.unsubscribe`
    /// with null.
    pub fn handle(
        &self,
        route: &str,
        user: &User,
        connection: Arc<dyn Connection>,
        payload: Value,
    ) -> Result<Value> {
        match route {
            SUBSCRIBE_ROUTE => {
                let request: SubscribeRequest = serde_json::from_value(payload)?;
                let id = self.subscribe(user, connection, request)?;
                Ok(Value::String(id.to_string()))
            }
            UNSUBSCRIBE_ROUTE => {
                let request: UnsubscribeRequest = serde_json::from_value(payload)?;
                self.unsubscribe(user, request)?;
                Ok(Value::Null)
            }
            other => Err(SyncError::UnknownRoute(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ChannelConnection;
    use crate::publications::{fetch_fn, PublicationOptions};
    use serde_json::json;

    fn routes() -> SyncRoutes {
        let engine = SyncEngine::default();
        engine
            .publish(
                "magazine",
                fetch_fn(|_, _, _| async { Ok(json!([])) }),
                ["MAGAZINE"],
                PublicationOptions::default(),
            )
            .unwrap();
        SyncRoutes::new(engine)
    }

    #[test]
    fn test_check_version() {
        assert!(check_version(Some(PROTOCOL_VERSION)).is_ok());
        let err = check_version(Some("0.0.0-old")).unwrap_err();
        assert_eq!(err.code(), "VERSION_INCOMPATIBLE");
        assert!(check_version(None).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_route() {
        let routes = routes();
        let (connection, _rx) = ChannelConnection::new();
        let user = User::new("UID1234", "TID");

        let id = routes
            .handle(
                SUBSCRIBE_ROUTE,
                &user,
                connection.clone(),
                json!({"version": PROTOCOL_VERSION, "publication": "magazine", "params": {"type": "fiction"}}),
            )
            .unwrap();
        assert!(id.is_string());
        assert_eq!(routes.engine().count_active(), 1);

        routes
            .handle(
                UNSUBSCRIBE_ROUTE,
                &user,
                connection,
                json!({"version": PROTOCOL_VERSION, "id": id}),
            )
            .unwrap();
        assert_eq!(routes.engine().count_active(), 0);
    }

    #[tokio::test]
    async fn test_incompatible_version_never_reaches_engine() {
        let routes = routes();
        let (connection, _rx) = ChannelConnection::new();
        let user = User::new("UID1234", "TID");

        let result = routes.handle(
            SUBSCRIBE_ROUTE,
            &user,
            connection,
            json!({"version": "0.0.0-old", "id": "sub#1", "publication": "magazine"}),
        );
        assert!(matches!(result, Err(SyncError::VersionIncompatible { .. })));
        assert_eq!(routes.engine().count_active(), 0);
    }

    #[tokio::test]
    async fn test_bad_payload_and_unknown_route() {
        let routes = routes();
        let (connection, _rx) = ChannelConnection::new();
        let user = User::new("UID1234", "TID");

        let result = routes.handle(SUBSCRIBE_ROUTE, &user, connection.clone(), json!("sub#1"));
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));

        let result = routes.handle("sync.publish", &user, connection, json!({}));
        assert!(matches!(result, Err(SyncError::UnknownRoute(_))));
    }
}
