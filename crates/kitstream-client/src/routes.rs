//! Route resolution: session descriptor to streaming client parameters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kitstream_common::{
    LocalConfig, RouteDescriptor, SessionDescriptor, MEDIA_ROUTE, SIGNALING_ROUTE,
};

/// Session id used for direct connections that bypass the control plane.
pub const LOCAL_SESSION_ID: &str = "local";

/// Everything the streaming client needs to attach to a session.
///
/// Field names on the wire match the streaming client's own configuration keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "backendUrl")]
    pub backend_url: String,
    #[serde(rename = "signalingserver")]
    pub signaling_server: String,
    #[serde(rename = "signalingport")]
    pub signaling_port: u16,
    #[serde(rename = "mediaserver")]
    pub media_server: String,
    #[serde(rename = "mediaport")]
    pub media_port: u16,
    #[serde(rename = "accessToken", default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("session {0} has no published routes")]
    NoRoutes(String),
    #[error("host {host} has no route tagged \"{tag}\"")]
    MissingRoute { host: String, tag: &'static str },
}

/// Build connection parameters from a ready session.
///
/// Uses the first host that publishes any routes and requires both a
/// `signaling` and a `media` route on it. Partial parameters are never
/// returned.
pub fn resolve(
    descriptor: &SessionDescriptor,
    backend_url: &str,
    access_token: &str,
) -> Result<ConnectionParameters, RouteError> {
    let (host, host_routes) = descriptor
        .routes
        .iter()
        .find(|(_, host_routes)| !host_routes.routes.is_empty())
        .ok_or_else(|| RouteError::NoRoutes(descriptor.id.clone()))?;

    let signaling = find_route(&host_routes.routes, SIGNALING_ROUTE).ok_or_else(|| {
        RouteError::MissingRoute {
            host: host.clone(),
            tag: SIGNALING_ROUTE,
        }
    })?;
    let media = find_route(&host_routes.routes, MEDIA_ROUTE).ok_or_else(|| {
        RouteError::MissingRoute {
            host: host.clone(),
            tag: MEDIA_ROUTE,
        }
    })?;

    Ok(ConnectionParameters {
        session_id: descriptor.id.clone(),
        backend_url: backend_url.to_string(),
        signaling_server: host.clone(),
        signaling_port: signaling.source_port,
        media_server: host.clone(),
        media_port: media.source_port,
        access_token: access_token.to_string(),
    })
}

fn find_route<'a>(routes: &'a [RouteDescriptor], tag: &str) -> Option<&'a RouteDescriptor> {
    routes.iter().find(|route| route.description == tag)
}

/// Parameters for a Kit instance reached directly, without a session.
pub fn local_parameters(local: &LocalConfig, access_token: &str) -> ConnectionParameters {
    ConnectionParameters {
        session_id: LOCAL_SESSION_ID.to_string(),
        backend_url: String::new(),
        signaling_server: local.server.clone(),
        signaling_port: local.signaling_port,
        media_server: local.server.clone(),
        media_port: local.media_port,
        access_token: access_token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitstream_common::HostRoutes;
    use std::collections::BTreeMap;

    fn route(description: &str, port: u16) -> RouteDescriptor {
        RouteDescriptor {
            description: description.to_string(),
            source_port: port,
            protocol: None,
            destination_port: None,
        }
    }

    fn descriptor(hosts: Vec<(&str, Vec<RouteDescriptor>)>) -> SessionDescriptor {
        let routes: BTreeMap<String, HostRoutes> = hosts
            .into_iter()
            .map(|(host, routes)| (host.to_string(), HostRoutes { routes }))
            .collect();
        SessionDescriptor {
            id: "session-1".to_string(),
            routes,
        }
    }

    #[test]
    fn test_resolve_picks_tagged_routes() {
        let desc = descriptor(vec![(
            "gpu-7.example.net",
            vec![route("media", 31002), route("other", 1), route("signaling", 31001)],
        )]);
        let params = resolve(&desc, "https://stream.example.net", "tok").unwrap();
        assert_eq!(params.session_id, "session-1");
        assert_eq!(params.signaling_server, "gpu-7.example.net");
        assert_eq!(params.signaling_port, 31001);
        assert_eq!(params.media_server, "gpu-7.example.net");
        assert_eq!(params.media_port, 31002);
        assert_eq!(params.backend_url, "https://stream.example.net");
        assert_eq!(params.access_token, "tok");
    }

    #[test]
    fn test_resolve_missing_media() {
        let desc = descriptor(vec![("h1", vec![route("signaling", 1)])]);
        assert_eq!(
            resolve(&desc, "", ""),
            Err(RouteError::MissingRoute {
                host: "h1".to_string(),
                tag: MEDIA_ROUTE
            })
        );
    }

    #[test]
    fn test_resolve_missing_signaling() {
        let desc = descriptor(vec![("h1", vec![route("media", 2)])]);
        assert!(matches!(
            resolve(&desc, "", ""),
            Err(RouteError::MissingRoute { tag: SIGNALING_ROUTE, .. })
        ));
    }

    #[test]
    fn test_resolve_no_routes() {
        let desc = descriptor(vec![]);
        assert_eq!(
            resolve(&desc, "", ""),
            Err(RouteError::NoRoutes("session-1".to_string()))
        );
    }

    #[test]
    fn test_resolve_skips_empty_hosts() {
        let desc = descriptor(vec![
            ("a-empty", vec![]),
            ("b-host", vec![route("signaling", 10), route("media", 11)]),
        ]);
        let params = resolve(&desc, "", "").unwrap();
        assert_eq!(params.signaling_server, "b-host");
    }

    #[test]
    fn test_resolve_only_looks_at_first_host() {
        // The second host is complete, but routes never mix across hosts.
        let desc = descriptor(vec![
            ("a-host", vec![route("signaling", 10)]),
            ("b-host", vec![route("signaling", 20), route("media", 21)]),
        ]);
        assert!(resolve(&desc, "", "").is_err());
    }

    #[test]
    fn test_wire_names() {
        let params = local_parameters(&LocalConfig::default(), "");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["signalingserver"], "127.0.0.1");
        assert_eq!(json["signalingport"], 49100);
        assert_eq!(json["mediaport"], 1024);
        assert_eq!(json["sessionId"], LOCAL_SESSION_ID);
    }
}
