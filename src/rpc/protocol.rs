//! Wire types

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, TransportError};
use crate::handles::DocumentRef;
use crate::{requests, responses};

use super::for_each_operation;

/// Bumped whenever a frame changes shape
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie to a worker
pub const MAGIC_COOKIE_KEY: &str = "PDF_WORKER_POOL_MAGIC_COOKIE";

/// Shared secret; rejects accidental connections to the wrong executable
pub const MAGIC_COOKIE_VALUE: &str = "6d8a2f3e91b04c7d8f5e2a1b9c0d4e7f";

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Version of the stdout announce line itself
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Line a worker prints on stdout once it is listening
pub fn announce_line(addr: SocketAddr) -> String {
    format!("{}|{}|tcp|{}", CORE_PROTOCOL_VERSION, PROTOCOL_VERSION, addr)
}

/// Parse an announce line into the address to connect to
pub fn parse_announce_line(line: &str) -> Result<SocketAddr, TransportError> {
    let parts: Vec<&str> = line.trim().split('|').collect();
    let [core, protocol, network, addr] = parts.as_slice() else {
        return Err(TransportError::Handshake(format!(
            "malformed announce line: {:?}",
            line
        )));
    };

    if core.parse::<u32>().ok() != Some(CORE_PROTOCOL_VERSION) {
        return Err(TransportError::Handshake(format!(
            "unsupported core protocol version {}",
            core
        )));
    }
    if protocol.parse::<u32>().ok() != Some(PROTOCOL_VERSION) {
        return Err(TransportError::Handshake(format!(
            "worker speaks protocol version {}, expected {}",
            protocol, PROTOCOL_VERSION
        )));
    }
    if *network != "tcp" {
        return Err(TransportError::Handshake(format!(
            "unsupported network type {}",
            network
        )));
    }
    addr.parse()
        .map_err(|e| TransportError::Handshake(format!("bad worker address {}: {}", addr, e)))
}

/// First frame from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: u32,
    pub magic_cookie: String,
}

impl Handshake {
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            magic_cookie: MAGIC_COOKIE_VALUE.to_string(),
        }
    }

    /// Why this handshake must be refused, if it must
    pub fn rejection(&self) -> Option<String> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Some(format!(
                "unsupported protocol version {} (expected {})",
                self.protocol_version, PROTOCOL_VERSION
            ));
        }
        if self.magic_cookie != MAGIC_COOKIE_VALUE {
            return Some("magic cookie mismatch".to_string());
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandshakeReply {
    Accepted { engine: String },
    Rejected { reason: String },
}

/// A document operation together with the document it targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scoped<T> {
    pub document: DocumentRef,
    #[serde(flatten)]
    pub request: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub call: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    pub outcome: Result<Response, RemoteError>,
}

/// A request/response pair that can be sent through [`super::RpcClient::call`]
pub trait Operation: Serialize + DeserializeOwned + Send + 'static {
    type Response: Send + 'static;

    const METHOD: &'static str;

    fn into_request(self, document: DocumentRef) -> Request;

    /// `None` when the reply is for another method
    fn from_response(response: Response) -> Option<Self::Response>;
}

macro_rules! define_protocol {
    ($($name:ident => $method:ident,)+) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "method", content = "params")]
        pub enum Request {
            /// Answered by the transport loop without touching the instance
            ControlPing,
            Ping,
            Close,
            Shutdown,
            OpenDocument(requests::OpenDocument),
            CloseDocument(requests::CloseDocument),
            $($name(Scoped<requests::$name>),)+
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "method", content = "result")]
        pub enum Response {
            ControlPing,
            Ping(String),
            Close,
            Shutdown,
            OpenDocument(responses::OpenDocument),
            CloseDocument(responses::CloseDocument),
            $($name(responses::$name),)+
        }

        impl Request {
            pub fn method(&self) -> &'static str {
                match self {
                    Request::ControlPing => "ControlPing",
                    Request::Ping => "Ping",
                    Request::Close => "Close",
                    Request::Shutdown => "Shutdown",
                    Request::OpenDocument(_) => "OpenDocument",
                    Request::CloseDocument(_) => "CloseDocument",
                    $(Request::$name(_) => stringify!($name),)+
                }
            }
        }

        $(
            impl Operation for requests::$name {
                type Response = responses::$name;

                const METHOD: &'static str = stringify!($name);

                fn into_request(self, document: DocumentRef) -> Request {
                    Request::$name(Scoped {
                        document,
                        request: self,
                    })
                }

                fn from_response(response: Response) -> Option<Self::Response> {
                    match response {
                        Response::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )+
    };
}

for_each_operation!(define_protocol);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{PageRef, Reference};
    use crate::requests::PageSelector;

    #[test]
    fn test_handshake_rejections() {
        assert!(Handshake::current().rejection().is_none());

        let mut wrong_version = Handshake::current();
        wrong_version.protocol_version = 2;
        assert!(wrong_version.rejection().unwrap().contains("protocol version"));

        let mut wrong_cookie = Handshake::current();
        wrong_cookie.magic_cookie = "nope".into();
        assert!(wrong_cookie.rejection().is_some());
    }

    #[test]
    fn test_announce_line() {
        let addr: SocketAddr = "127.0.0.1:40123".parse().unwrap();
        let line = announce_line(addr);
        assert_eq!(line, "1|1|tcp|127.0.0.1:40123");
        assert_eq!(parse_announce_line(&format!("{}\n", line)).unwrap(), addr);

        assert!(parse_announce_line("1|2|tcp|127.0.0.1:1").is_err());
        assert!(parse_announce_line("1|1|unix|/tmp/sock").is_err());
        assert!(parse_announce_line("hello from the worker").is_err());
    }

    #[test]
    fn test_scoped_request_wire_shape() {
        let document: DocumentRef = serde_json::from_str("\"doc-1\"").unwrap();
        let call = requests::GetPageSize {
            page: PageSelector::Reference(PageRef::from_token("page-1".into())),
        }
        .into_request(document);

        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "method": "GetPageSize",
                "params": { "document": "doc-1", "page": { "reference": "page-1" } }
            })
        );

        let back: Request = serde_json::from_value(value).unwrap();
        assert_eq!(back.method(), "GetPageSize");
    }

    #[test]
    fn test_empty_request_round_trips_through_flatten() {
        let document: DocumentRef = serde_json::from_str("\"doc-1\"").unwrap();
        let frame = RequestFrame {
            id: 7,
            call: requests::GetPageCount {}.into_request(document),
        };
        let text = serde_json::to_string(&frame).unwrap();
        let back: RequestFrame = serde_json::from_str(&text).unwrap();
        assert!(matches!(back.call, Request::GetPageCount(ref s) if s.document.token() == "doc-1"));
    }

    #[test]
    fn test_unit_requests() {
        let text = serde_json::to_string(&Request::Ping).unwrap();
        assert_eq!(text, r#"{"method":"Ping"}"#);
        let back: Request = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, Request::Ping));
    }

    #[test]
    fn test_from_response_rejects_other_methods() {
        let response = Response::GetPageCount(responses::GetPageCount { page_count: 3 });
        assert!(requests::GetFileVersion::from_response(response.clone()).is_none());
        assert_eq!(
            requests::GetPageCount::from_response(response).unwrap().page_count,
            3
        );
    }
}
