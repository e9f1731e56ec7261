//! RPC framing.
//!
//! Every frame on the connection is one length-delimited [`RpcFrame`]. A
//! call is identified by `call_id`; several calls share one connection.
//!
//! ```text
//! client                                   server
//!   │ REQUEST(id=1, EXECUTE, AgentRequest)   │
//!   │───────────────────────────────────────►│
//!   │◄─── RESPONSE(id=1, AgentResponse) ─────│
//!   │◄─── END(id=1) ─────────────────────────│
//!   │                                        │
//!   │ REQUEST(id=2, EXECUTE_STREAM) ...      │  one REQUEST per turn
//!   │ END(id=2)                              │  client half-close
//!   │◄─── TURN_END(id=2) ────────────────────│  after each turn
//!   │ CANCEL(id=2)                           │  hard stop
//! ```

use bytes::Bytes;
use prost::Message;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::{AgentError, Result};

/// Remote operation a call invokes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    Unspecified = 0,
    Help = 1,
    Execute = 2,
    ExecuteStream = 3,
}

/// Role of a frame within its call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    Unspecified = 0,
    /// Client to server: one encoded `AgentRequest`
    Request = 1,
    /// Server to client: one encoded `AgentResponse`
    Response = 2,
    /// Normal end of one direction of the call
    End = 3,
    /// Server to client: the call failed, `error` says why
    Error = 4,
    /// Client to server: abandon the call
    Cancel = 5,
    /// Server to client: every response of the current ExecuteStream turn
    /// has been sent
    TurnEnd = 6,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcFrame {
    #[prost(uint64, tag = "1")]
    pub call_id: u64,
    #[prost(enumeration = "Method", tag = "2")]
    pub method: i32,
    #[prost(enumeration = "FrameKind", tag = "3")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
    #[prost(string, optional, tag = "5")]
    pub error: Option<String>,
}

impl RpcFrame {
    fn new(call_id: u64, method: Method, kind: FrameKind) -> Self {
        Self {
            call_id,
            method: method as i32,
            kind: kind as i32,
            payload: Vec::new(),
            error: None,
        }
    }

    pub fn request<M: Message>(call_id: u64, method: Method, request: &M) -> Self {
        let mut frame = Self::new(call_id, method, FrameKind::Request);
        frame.payload = request.encode_to_vec();
        frame
    }

    pub fn response<M: Message>(call_id: u64, method: Method, response: &M) -> Self {
        let mut frame = Self::new(call_id, method, FrameKind::Response);
        frame.payload = response.encode_to_vec();
        frame
    }

    pub fn end(call_id: u64, method: Method) -> Self {
        Self::new(call_id, method, FrameKind::End)
    }

    pub fn cancel(call_id: u64, method: Method) -> Self {
        Self::new(call_id, method, FrameKind::Cancel)
    }

    pub fn turn_end(call_id: u64) -> Self {
        Self::new(call_id, Method::ExecuteStream, FrameKind::TurnEnd)
    }

    pub fn failure(call_id: u64, method: Method, err: &AgentError) -> Self {
        let mut frame = Self::new(call_id, method, FrameKind::Error);
        frame.error = Some(err.to_string());
        frame
    }

    /// Decodes the payload as `M`.
    pub fn decode_payload<M: Message + Default>(&self) -> Result<M> {
        Ok(M::decode(self.payload.as_slice())?)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(Self::decode(buf)?)
    }
}

/// Length-delimited codec capped at `max_frame_bytes`.
pub fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}
